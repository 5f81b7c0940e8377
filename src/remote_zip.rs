//! Selective extraction of entries from a remote archive.
//!
//! Listing costs two ranged requests (the tail, then the central directory).
//! Extraction merges the wanted entries into spans, fetches the spans
//! concurrently and unzips each span as soon as it lands.

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::PartialDownloadCache;
use crate::catalog::ZipCatalog;
use crate::error::{Result, ZipError};
use crate::io::RangeDownloader;
use crate::metrics::ZipMetrics;
use crate::zip::{
    CentralDirectoryParser, DEFAULT_LOCAL_HEADER_SIZE_GUESS, EndOfCentralDirectoryParser,
    EntryMerger, MAX_LOOKBACK, MergedSpan, SpanExtractor, ZipEntryDescriptor, file_crc32,
    target_path,
};

/// Maximum number of concurrent span downloads.
pub const POOL_MAX_SIZE: usize = 8;

/// Tuning knobs for [`RemoteZip`].
#[derive(Debug, Clone)]
pub struct RemoteZipOptions {
    /// Honour ZIP64 records and extra fields.
    pub use_zip64: bool,
    /// Trailing bytes fetched to find the end of central directory.
    pub max_lookback: u64,
    /// Upper-bound guess of a local header's size used when sizing spans.
    pub local_header_size_guess: u64,
    /// Gap tolerated between neighbouring entries before starting a new span.
    pub merge_distance: u64,
    /// Cap on concurrent span downloads.
    pub pool_max: usize,
    pub span_timeout: Duration,
    /// Bound on waiting for all span downloads and extractions.
    ///
    /// On expiry pending downloads are aborted, but extractions already
    /// running on the blocking pool cannot be interrupted and may still write
    /// into the destination after [`ZipError::Timeout`] is returned.
    pub join_timeout: Duration,
    /// Re-check the CRC of files already present in the destination.
    pub verify_existing: bool,
}

impl Default for RemoteZipOptions {
    fn default() -> Self {
        Self {
            use_zip64: false,
            max_lookback: MAX_LOOKBACK,
            local_header_size_guess: DEFAULT_LOCAL_HEADER_SIZE_GUESS,
            merge_distance: 0,
            pool_max: POOL_MAX_SIZE,
            span_timeout: Duration::from_secs(30 * 60),
            join_timeout: Duration::from_secs(60 * 60),
            verify_existing: false,
        }
    }
}

impl RemoteZipOptions {
    pub fn use_zip64(mut self, use_zip64: bool) -> Self {
        self.use_zip64 = use_zip64;
        self
    }

    pub fn max_lookback(mut self, bytes: u64) -> Self {
        self.max_lookback = bytes;
        self
    }

    pub fn local_header_size_guess(mut self, bytes: u64) -> Self {
        self.local_header_size_guess = bytes;
        self
    }

    pub fn merge_distance(mut self, bytes: u64) -> Self {
        self.merge_distance = bytes;
        self
    }

    pub fn pool_max(mut self, pool_max: usize) -> Self {
        self.pool_max = pool_max.max(1);
        self
    }

    pub fn span_timeout(mut self, timeout: Duration) -> Self {
        self.span_timeout = timeout;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn verify_existing(mut self, verify: bool) -> Self {
        self.verify_existing = verify;
        self
    }
}

/// Outcome of [`RemoteZip::download_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Entries whose target already existed in the destination
    pub skipped_existing: usize,
    /// Entries materialised from the partial download cache
    pub cache_hits: usize,
    /// Entries extracted from downloaded spans
    pub downloaded: usize,
    pub spans: usize,
    pub bytes_downloaded: u64,
}

/// Per-span result folded into the [`DownloadSummary`].
#[derive(Debug, Default)]
struct SpanOutcome {
    bytes: u64,
    extracted: usize,
    errors: Vec<ZipError>,
}

/// Removes a file when dropped.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to delete {}: {}", self.0.display(), e);
            }
        }
    }
}

/// A ZIP archive reachable through a [`RangeDownloader`].
pub struct RemoteZip {
    remote_path: String,
    file_size: u64,
    downloader: Arc<dyn RangeDownloader>,
    options: RemoteZipOptions,
    cache: Option<Arc<dyn PartialDownloadCache>>,
    metrics: Arc<ZipMetrics>,
}

impl RemoteZip {
    pub fn new(remote_path: impl Into<String>, file_size: u64, downloader: Arc<dyn RangeDownloader>) -> Self {
        Self {
            remote_path: remote_path.into(),
            file_size,
            downloader,
            options: RemoteZipOptions::default(),
            cache: None,
            metrics: Arc::new(ZipMetrics::default()),
        }
    }

    pub fn with_options(mut self, options: RemoteZipOptions) -> Self {
        self.options = options;
        self
    }

    /// Consult and populate `cache` keyed by entry name and CRC.
    pub fn with_cache(mut self, cache: Arc<dyn PartialDownloadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ZipMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn options(&self) -> &RemoteZipOptions {
        &self.options
    }

    pub fn use_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn metrics(&self) -> &Arc<ZipMetrics> {
        &self.metrics
    }

    fn file_stem(&self) -> String {
        Path::new(&self.remote_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "remote-zip".to_string())
    }

    fn temp_dir(&self) -> Result<tempfile::TempDir> {
        tempfile::Builder::new()
            .prefix(&format!("{}-", self.file_stem()))
            .tempdir()
            .map_err(|e| ZipError::retrieval(&self.remote_path, e.into()))
    }

    async fn fetch(&self, dest: &Path, offset: u64, length: Option<u64>) -> Result<Vec<u8>> {
        self.downloader
            .download(&self.remote_path, dest, offset, length)
            .await
            .map_err(|e| ZipError::retrieval(&self.remote_path, e))?;
        tokio::fs::read(dest)
            .await
            .map_err(|e| ZipError::retrieval(&self.remote_path, e.into()))
    }

    fn tag_format_error(&self, err: ZipError) -> ZipError {
        match err {
            ZipError::Format(msg) => ZipError::Format(format!("{}: {}", self.remote_path, msg)),
            other => other,
        }
    }

    /// List the archive's entries.
    ///
    /// Downloads the last `max_lookback` bytes (the whole archive when it is
    /// smaller), locates the central directory, downloads exactly that range
    /// and parses it. Temporary files are removed whatever the outcome.
    pub async fn list_entries(&self) -> Result<ZipCatalog> {
        let temp_dir = self.temp_dir()?;

        let (offset, length) = if self.file_size <= self.options.max_lookback {
            // The lookback covers the whole archive; ask for all of it.
            (0, None)
        } else {
            let size = self.options.max_lookback;
            (self.file_size - size, Some(size))
        };

        let tail = self.fetch(&temp_dir.path().join("tail"), offset, length).await?;
        let eocd = EndOfCentralDirectoryParser::parse(&tail, self.file_size, self.options.use_zip64)
            .map_err(|e| self.tag_format_error(e))?;
        debug!(
            "Central directory of {} at offset {} ({} bytes, {} entries)",
            self.remote_path, eocd.central_dir_offset, eocd.central_dir_size, eocd.entry_count
        );

        let central_dir = if eocd.central_dir_size == 0 {
            Vec::new()
        } else {
            self.fetch(
                &temp_dir.path().join("central-dir"),
                eocd.central_dir_offset,
                Some(eocd.central_dir_size),
            )
            .await?
        };

        let entries = CentralDirectoryParser::parse(&central_dir, &eocd, self.options.use_zip64)
            .map_err(|e| self.tag_format_error(e))?;

        Ok(ZipCatalog::new(
            self.remote_path.clone(),
            self.file_size,
            eocd,
            entries,
        ))
    }

    /// Extract `entries` into `dest_dir`.
    ///
    /// Entries whose target already exists are skipped without checking their
    /// content unless `verify_existing` is set. When a cache is attached, cache
    /// hits are copied instead of downloaded. The rest are merged into spans,
    /// downloaded by at most `pool_max` concurrent tasks and extracted as each
    /// span arrives.
    ///
    /// All scheduled work runs to completion before the first error (if any)
    /// is returned. Files extracted successfully stay on disk either way.
    pub async fn download_files(
        &self,
        dest_dir: &Path,
        entries: &[ZipEntryDescriptor],
    ) -> Result<DownloadSummary> {
        let mut summary = DownloadSummary::default();
        if entries.is_empty() {
            return Ok(summary);
        }
        let start = Instant::now();

        let mut errors = Vec::new();
        let mut to_download = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();
        for entry in entries {
            let target = match target_path(dest_dir, &entry.file_name) {
                Ok(target) => target,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if self.is_satisfied(entry, &target).await {
                skipped.push(entry.file_name.as_str());
            } else {
                to_download.push(entry.clone());
            }
        }
        if !skipped.is_empty() {
            debug!("Skip download on already existing files: {:?}", skipped);
            summary.skipped_existing = skipped.len();
            self.metrics.record_skipped_existing(skipped.len() as u64);
        }

        if let Some(cache) = &self.cache {
            debug!("Partial download cache is enabled, evaluating.");
            let mut remaining = Vec::with_capacity(to_download.len());
            for entry in to_download {
                if self.try_cache(cache.clone(), dest_dir, &entry).await {
                    debug!("Retrieved {} from cache", entry.file_name);
                    self.metrics.record_cache_hit();
                    summary.cache_hits += 1;
                } else {
                    remaining.push(entry);
                }
            }
            to_download = remaining;
        }

        if to_download.is_empty() {
            return self.finish(summary, errors);
        }

        let spans = EntryMerger::new(self.file_size)
            .with_header_size_guess(self.options.local_header_size_guess)
            .with_merge_distance(self.options.merge_distance)
            .create_collections(&to_download);

        // Dropping the directory deletes every span file left in it.
        let download_dir = self.temp_dir()?;
        info!(
            "Downloading {} files from remote zip file {} in {} sections to {}",
            to_download.len(),
            self.remote_path,
            spans.len(),
            download_dir.path().display()
        );

        summary.spans = spans.len();
        let outcomes = self.run_spans(spans, dest_dir, download_dir.path()).await;

        match outcomes {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        Ok(span) => {
                            summary.bytes_downloaded += span.bytes;
                            summary.downloaded += span.extracted;
                            errors.extend(span.errors);
                        }
                        Err(e) => errors.push(e),
                    }
                }
            }
            Err(e) => errors.push(e),
        }

        info!(
            "{} files downloaded from remote zip file in {:?}. Total download size: {} bytes.",
            summary.downloaded,
            start.elapsed(),
            summary.bytes_downloaded
        );

        self.finish(summary, errors)
    }

    /// Return `summary`, or the first of `errors` after logging all of them.
    fn finish(&self, summary: DownloadSummary, mut errors: Vec<ZipError>) -> Result<DownloadSummary> {
        if errors.is_empty() {
            return Ok(summary);
        }

        error!(
            "{} errors raised when downloading partially from {}",
            errors.len(),
            self.remote_path
        );
        for e in &errors {
            error!("{}", e);
        }
        Err(errors.remove(0))
    }

    /// Whether an existing target satisfies `entry`.
    async fn is_satisfied(&self, entry: &ZipEntryDescriptor, target: &Path) -> bool {
        if !tokio::fs::try_exists(target).await.unwrap_or(false) {
            return false;
        }
        if !self.options.verify_existing || entry.is_directory() {
            return true;
        }

        let path = target.to_path_buf();
        let expected = entry.crc;
        match tokio::task::spawn_blocking(move || file_crc32(&path)).await {
            Ok(Ok(actual)) if actual == expected => true,
            Ok(Ok(actual)) => {
                warn!(
                    "Existing {} has CRC {:08x}, expected {:08x}; downloading again",
                    target.display(),
                    actual,
                    expected
                );
                if let Err(e) = tokio::fs::remove_file(target).await {
                    warn!("Failed to delete {}: {}", target.display(), e);
                }
                false
            }
            Ok(Err(e)) => {
                warn!("Failed to verify {}: {}", target.display(), e);
                false
            }
            Err(e) => {
                warn!("Failed to verify {}: {}", target.display(), e);
                false
            }
        }
    }

    async fn try_cache(
        &self,
        cache: Arc<dyn PartialDownloadCache>,
        dest_dir: &Path,
        entry: &ZipEntryDescriptor,
    ) -> bool {
        if entry.is_directory() {
            return false;
        }
        let Ok(target) = target_path(dest_dir, &entry.file_name) else {
            return false;
        };
        let key = entry.file_name.clone();
        let version = entry.crc.to_string();
        let lookup_target = target.clone();

        match tokio::task::spawn_blocking(move || cache.get(&lookup_target, &key, &version)).await {
            Ok(Ok(hit)) => return hit,
            Ok(Err(e)) => warn!("Cache lookup for {} failed: {:#}", entry.file_name, e),
            Err(e) => warn!("Cache lookup for {} failed: {}", entry.file_name, e),
        }

        // A failed lookup may leave a partial copy that would pass the existence check.
        if let Err(e) = tokio::fs::remove_file(&target).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to delete {}: {}", target.display(), e);
            }
        }
        false
    }

    /// Download and extract every span; one result per span.
    ///
    /// Downloads are bounded by a semaphore. A span releases its permit once
    /// downloaded so its extraction on the blocking pool overlaps with other
    /// downloads.
    async fn run_spans(
        &self,
        spans: Vec<MergedSpan>,
        dest_dir: &Path,
        download_dir: &Path,
    ) -> Result<Vec<Result<SpanOutcome>>> {
        let permits = Arc::new(Semaphore::new(spans.len().min(self.options.pool_max).max(1)));
        let mut tasks = JoinSet::new();

        for (index, span) in spans.into_iter().enumerate() {
            let permits = permits.clone();
            let downloader = self.downloader.clone();
            let cache = self.cache.clone();
            let metrics = self.metrics.clone();
            let remote_path = self.remote_path.clone();
            let dest_dir = dest_dir.to_path_buf();
            let span_file = download_dir.join(format!("span-{}", index));
            let span_timeout = self.options.span_timeout;

            // End offset is based on the local header size guess, so it can exceed the file size.
            let length = span.len().min(self.file_size.saturating_sub(span.start_offset));

            tasks.spawn(async move {
                let guard = TempFileGuard(span_file.clone());

                let bytes = {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| ZipError::Io(std::io::Error::other(e)))?;
                    let download = downloader.download(&remote_path, &span_file, span.start_offset, Some(length));
                    match tokio::time::timeout(span_timeout, download).await {
                        Ok(Ok(bytes)) => bytes,
                        Ok(Err(e)) => return Err(ZipError::retrieval(&remote_path, e)),
                        Err(_) => return Err(ZipError::Timeout(span_timeout)),
                    }
                };
                metrics.record_span(bytes);

                let outcome = tokio::task::spawn_blocking(move || {
                    let _guard = guard;
                    extract_span(&span, &span_file, &dest_dir, cache.as_deref(), &metrics)
                })
                .await
                .map_err(|e| ZipError::Io(std::io::Error::other(e)))?;

                Ok::<_, ZipError>(SpanOutcome { bytes, ..outcome })
            });
        }

        let join_timeout = self.options.join_timeout;
        let joined = tokio::time::timeout(join_timeout, async {
            let mut results = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                results.push(joined.unwrap_or_else(|e| Err(ZipError::Io(std::io::Error::other(e)))));
            }
            results
        })
        .await;

        match joined {
            Ok(results) => Ok(results),
            Err(_) => {
                tasks.abort_all();
                Err(ZipError::Timeout(join_timeout))
            }
        }
    }
}

/// Extract every entry of a downloaded span, collecting per-entry errors.
///
/// A failing entry does not stop its siblings.
fn extract_span(
    span: &MergedSpan,
    span_file: &Path,
    dest_dir: &Path,
    cache: Option<&dyn PartialDownloadCache>,
    metrics: &ZipMetrics,
) -> SpanOutcome {
    let mut outcome = SpanOutcome::default();

    let mut extractor = match SpanExtractor::open(span_file, span.start_offset) {
        Ok(extractor) => extractor,
        Err(e) => {
            outcome.errors.push(e);
            return outcome;
        }
    };

    for entry in &span.entries {
        let target = match target_path(dest_dir, &entry.file_name) {
            Ok(target) => target,
            Err(e) => {
                outcome.errors.push(e);
                continue;
            }
        };
        if target.exists() {
            debug!("Downloaded {} already exists, skip partial unzip.", entry.file_name);
            continue;
        }

        match extractor.extract_to_file(entry, &target) {
            Ok(size) => {
                debug!("Downloaded {}. unzipped size: {}", entry.file_name, size);
                metrics.record_extracted();
                outcome.extracted += 1;
            }
            Err(e) => {
                error!("Failed to unzip {}: {}", entry.file_name, e);
                outcome.errors.push(e);
                continue;
            }
        }

        if let Some(cache) = cache {
            if !entry.is_directory() {
                if let Err(e) = cache.put(&target, &entry.file_name, &entry.crc.to_string()) {
                    warn!("Failed to cache {}: {:#}", entry.file_name, e);
                }
            }
        }
    }

    outcome
}
