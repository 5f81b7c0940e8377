//! # remotezip
//!
//! Selectively extract entries from a remote ZIP archive without downloading
//! the whole file.
//!
//! Listing fetches only the archive's tail and its central directory. Wanted
//! entries are then merged into a few contiguous byte ranges, downloaded
//! concurrently through a [`RangeDownloader`] and unzipped as each range
//! arrives. Extracted entries can be kept in a [`PartialDownloadCache`] keyed
//! by name and CRC so later requests skip the network entirely.
//!
//! ## Features
//!
//! - Ranged downloads over HTTP/HTTPS or from local files
//! - Support for ZIP64 format (archives larger than 4GB)
//! - Support for STORED (uncompressed) and DEFLATE compression methods
//! - CRC verification of every extracted entry
//! - Bounded concurrent span downloads overlapping with extraction
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use remotezip::{HttpRangeDownloader, RemoteZip};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let url = "https://example.com/archive.zip";
//!     let downloader = Arc::new(HttpRangeDownloader::new()?);
//!     let size = downloader.content_length(url).await?;
//!
//!     let zip = RemoteZip::new(url, size, downloader);
//!     let catalog = zip.list_entries().await?;
//!     let wanted = catalog.select(&["*.txt"]);
//!     zip.download_files(Path::new("out"), &wanted).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod cli;
pub mod error;
pub mod io;
pub mod metrics;
pub mod pool;
pub mod remote_zip;
pub mod zip;

pub use cache::{FsPartialDownloadCache, PartialDownloadCache};
pub use catalog::ZipCatalog;
pub use cli::Cli;
pub use error::ZipError;
pub use io::{HttpRangeDownloader, LocalFileDownloader, RangeDownloader};
pub use metrics::{MetricsSnapshot, ZipMetrics};
pub use pool::{Clock, EvictionPolicy, ManualClock, RemoteZipPool, SystemClock};
pub use remote_zip::{DownloadSummary, POOL_MAX_SIZE, RemoteZip, RemoteZipOptions};
pub use zip::{CompressionMethod, EndCentralDirectoryInfo, ZipEntryDescriptor};
