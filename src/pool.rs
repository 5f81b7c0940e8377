//! Process-level pool of [`RemoteZip`] handles and their catalogs.
//!
//! Construct one pool at startup and pass it to whoever resolves remote
//! archives. Entries are evicted least-recently-used first once the pool is
//! full, and after `ttl` without access.

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::catalog::ZipCatalog;
use crate::error::Result;
use crate::remote_zip::RemoteZip;

/// Source of "now" in milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    pub max_entries: usize,
    /// Entries idle for longer than this are dropped.
    pub ttl: Option<Duration>,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 20,
            ttl: Some(Duration::from_secs(60 * 60)),
        }
    }
}

struct PoolEntry {
    zip: Arc<RemoteZip>,
    catalog: Option<Arc<ZipCatalog>>,
    last_access: u64,
}

pub struct RemoteZipPool {
    clock: Arc<dyn Clock>,
    policy: EvictionPolicy,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl RemoteZipPool {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: EvictionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, remote_path: &str) -> bool {
        self.entries.lock().contains_key(remote_path)
    }

    /// Last access time of `remote_path` in clock milliseconds.
    pub fn last_access(&self, remote_path: &str) -> Option<u64> {
        self.entries.lock().get(remote_path).map(|e| e.last_access)
    }

    /// Return the pooled handle for `remote_path`, creating it with `make`.
    ///
    /// A pooled handle whose size differs from `file_size` belongs to an
    /// older build of the archive and is replaced.
    pub fn get_or_create<F>(&self, remote_path: &str, file_size: u64, make: F) -> Arc<RemoteZip>
    where
        F: FnOnce() -> RemoteZip,
    {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries, now);

        if let Some(entry) = entries.get_mut(remote_path) {
            if entry.zip.file_size() == file_size {
                entry.last_access = now;
                return entry.zip.clone();
            }
            debug!("{} changed size, dropping pooled handle", remote_path);
        }

        let zip = Arc::new(make());
        entries.insert(
            remote_path.to_string(),
            PoolEntry {
                zip: zip.clone(),
                catalog: None,
                last_access: now,
            },
        );
        self.evict_overflow(&mut entries);
        zip
    }

    /// List `zip` once and reuse the catalog while the handle stays pooled.
    ///
    /// Concurrent first calls may each list the archive; the last one wins.
    pub async fn list_entries(&self, zip: &Arc<RemoteZip>) -> Result<Arc<ZipCatalog>> {
        {
            let now = self.clock.now_millis();
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(zip.remote_path()) {
                if Arc::ptr_eq(&entry.zip, zip) {
                    entry.last_access = now;
                    if let Some(catalog) = &entry.catalog {
                        return Ok(catalog.clone());
                    }
                }
            }
        }

        let catalog = Arc::new(zip.list_entries().await?);

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(zip.remote_path()) {
            if Arc::ptr_eq(&entry.zip, zip) {
                entry.catalog = Some(catalog.clone());
            }
        }
        Ok(catalog)
    }

    pub fn remove(&self, remote_path: &str) -> Option<Arc<RemoteZip>> {
        self.entries.lock().remove(remote_path).map(|e| e.zip)
    }

    /// Drop entries idle past the policy's TTL.
    pub fn evict_idle(&self) {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries, now);
    }

    fn evict_expired(&self, entries: &mut HashMap<String, PoolEntry>, now: u64) {
        let Some(ttl) = self.policy.ttl else {
            return;
        };
        let ttl = ttl.as_millis() as u64;
        entries.retain(|path, entry| {
            let keep = now.saturating_sub(entry.last_access) <= ttl;
            if !keep {
                debug!("Evicting idle remote zip {}", path);
            }
            keep
        });
    }

    fn evict_overflow(&self, entries: &mut HashMap<String, PoolEntry>) {
        while entries.len() > self.policy.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(path, _)| path.clone());
            match oldest {
                Some(path) => {
                    debug!("Evicting least recently used remote zip {}", path);
                    entries.remove(&path);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileDownloader;

    fn zip(path: &str, size: u64) -> RemoteZip {
        RemoteZip::new(path, size, Arc::new(LocalFileDownloader::new()))
    }

    #[test]
    fn test_reuses_handle_for_same_path() {
        let pool = RemoteZipPool::new(EvictionPolicy::default());
        let a = pool.get_or_create("a.zip", 10, || zip("a.zip", 10));
        let b = pool.get_or_create("a.zip", 10, || zip("a.zip", 10));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_replaces_handle_when_size_changes() {
        let pool = RemoteZipPool::new(EvictionPolicy::default());
        let a = pool.get_or_create("a.zip", 10, || zip("a.zip", 10));
        let b = pool.get_or_create("a.zip", 20, || zip("a.zip", 20));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.file_size(), 20);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let clock = Arc::new(ManualClock::new(1_000));
        let policy = EvictionPolicy {
            max_entries: 2,
            ttl: None,
        };
        let pool = RemoteZipPool::with_clock(policy, clock.clone());

        pool.get_or_create("a.zip", 1, || zip("a.zip", 1));
        clock.advance(Duration::from_millis(10));
        pool.get_or_create("b.zip", 1, || zip("b.zip", 1));
        clock.advance(Duration::from_millis(10));
        // Touch a so b becomes the oldest.
        pool.get_or_create("a.zip", 1, || zip("a.zip", 1));
        clock.advance(Duration::from_millis(10));
        pool.get_or_create("c.zip", 1, || zip("c.zip", 1));

        assert_eq!(pool.len(), 2);
        assert!(pool.contains("a.zip"));
        assert!(!pool.contains("b.zip"));
        assert!(pool.contains("c.zip"));
        assert_eq!(pool.last_access("a.zip"), Some(1_020));
    }

    #[test]
    fn test_evicts_idle_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let policy = EvictionPolicy {
            max_entries: 10,
            ttl: Some(Duration::from_secs(60)),
        };
        let pool = RemoteZipPool::with_clock(policy, clock.clone());

        pool.get_or_create("a.zip", 1, || zip("a.zip", 1));
        clock.advance(Duration::from_secs(61));
        pool.evict_idle();

        assert!(pool.is_empty());
    }
}
