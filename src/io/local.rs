use super::RangeDownloader;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Serves byte ranges out of archives on the local filesystem.
///
/// `remote_path` is interpreted as a local file path.
#[derive(Default)]
pub struct LocalFileDownloader {
    transferred_bytes: AtomicU64,
}

impl LocalFileDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the archive at `path`.
    pub async fn file_size(path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len())
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RangeDownloader for LocalFileDownloader {
    async fn download(
        &self,
        remote_path: &str,
        dest: &Path,
        offset: u64,
        length: Option<u64>,
    ) -> Result<u64> {
        let mut src = File::open(remote_path)
            .await
            .with_context(|| format!("Failed to open {}", remote_path))?;
        let size = src.metadata().await?.len();

        if offset > size {
            bail!("Offset {} is past the end of {} ({} bytes)", offset, remote_path, size);
        }
        let available = size - offset;
        let wanted = length.unwrap_or(available);
        if wanted > available {
            bail!(
                "Requested {} bytes at offset {} but {} only has {} bytes left",
                wanted,
                offset,
                remote_path,
                available
            );
        }

        src.seek(SeekFrom::Start(offset)).await?;
        let mut out = File::create(dest).await?;
        let copied = tokio::io::copy(&mut src.take(wanted), &mut out).await?;
        out.flush().await?;

        self.transferred_bytes.fetch_add(copied, Ordering::Relaxed);
        Ok(copied)
    }
}
