mod http;
mod local;

pub use http::HttpRangeDownloader;
pub use local::LocalFileDownloader;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Fetches byte ranges of a remote object into local files.
#[async_trait]
pub trait RangeDownloader: Send + Sync {
    /// Download `[offset, offset + length)` of `remote_path` into `dest`,
    /// replacing any existing file.
    ///
    /// A `length` of `None` downloads everything from `offset` to the end of
    /// the object. Returns the number of bytes written.
    async fn download(
        &self,
        remote_path: &str,
        dest: &Path,
        offset: u64,
        length: Option<u64>,
    ) -> Result<u64>;
}
