//! Content-addressed cache of previously extracted archive entries.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Cache of extracted entries keyed by `(key, version)`.
///
/// [`RemoteZip`](crate::RemoteZip) uses the entry name as key and its CRC as
/// version, so a rebuilt archive reusing a name never serves stale content.
/// Implementations are shared across download tasks and must be thread-safe.
pub trait PartialDownloadCache: Send + Sync {
    /// Copy the cached file for `(key, version)` to `target`.
    ///
    /// Returns `false` on a miss.
    fn get(&self, target: &Path, key: &str, version: &str) -> Result<bool>;

    /// Store a copy of `source` under `(key, version)`.
    fn put(&self, source: &Path, key: &str, version: &str) -> Result<()>;
}

/// Filesystem-backed cache with one directory per hashed key.
pub struct FsPartialDownloadCache {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FsPartialDownloadCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache root {}", root.display()))?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str, version: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        let version = hex::encode(Sha256::digest(version.as_bytes()));
        self.root.join(&digest[..2]).join(&digest).join(version)
    }
}

impl PartialDownloadCache for FsPartialDownloadCache {
    fn get(&self, target: &Path, key: &str, version: &str) -> Result<bool> {
        let _guard = self.lock.read();
        let cached = self.entry_path(key, version);
        if !cached.is_file() {
            return Ok(false);
        }

        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        // Stage next to the target so a failed copy never leaves a partial file behind.
        let mut staged = tempfile::NamedTempFile::new_in(parent)?;
        let mut src = fs::File::open(&cached)
            .with_context(|| format!("Failed to open {}", cached.display()))?;
        std::io::copy(&mut src, staged.as_file_mut()).with_context(|| {
            format!("Failed to copy {} to {}", cached.display(), target.display())
        })?;
        staged
            .persist(target)
            .with_context(|| format!("Failed to persist {}", target.display()))?;
        Ok(true)
    }

    fn put(&self, source: &Path, key: &str, version: &str) -> Result<()> {
        let _guard = self.lock.write();
        let cached = self.entry_path(key, version);

        // Skip if already exists (idempotent)
        if cached.is_file() {
            return Ok(());
        }

        let dir = cached
            .parent()
            .context("cache entry path has no parent")?;
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        // Stage next to the final path so the rename is atomic.
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        let mut src = fs::File::open(source)
            .with_context(|| format!("Failed to open {}", source.display()))?;
        std::io::copy(&mut src, staged.as_file_mut())?;
        staged
            .persist(&cached)
            .with_context(|| format!("Failed to persist {}", cached.display()))?;
        Ok(())
    }
}
