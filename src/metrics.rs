//! Counters for partial downloads (thread-safe).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ZipMetrics {
    /// Entries served from the partial download cache
    pub cache_hits: AtomicU64,
    /// Entries skipped because the target already existed
    pub skipped_existing: AtomicU64,
    /// Spans fetched from the remote archive
    pub spans_downloaded: AtomicU64,
    /// Bytes fetched for spans
    pub bytes_downloaded: AtomicU64,
    /// Entries written from downloaded spans
    pub entries_extracted: AtomicU64,
}

impl ZipMetrics {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_existing(&self, count: u64) {
        self.skipped_existing.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_span(&self, bytes: u64) {
        self.spans_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_extracted(&self) {
        self.entries_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            skipped_existing: self.skipped_existing.load(Ordering::Relaxed),
            spans_downloaded: self.spans_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            entries_extracted: self.entries_extracted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ZipMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub skipped_existing: u64,
    pub spans_downloaded: u64,
    pub bytes_downloaded: u64,
    pub entries_extracted: u64,
}
