use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::adapter::CheckResult;
use crate::key::CacheKey;
use crate::store::Store;

/// Entry schema version. Entries carrying any other version are treated
/// as misses and removed by the next cleanup.
pub(crate) const ENTRY_VERSION: u32 = 1;

/// Cleanup starts asynchronously once the store passes this fraction of
/// `max_size`.
const HIGH_WATER: f64 = 0.9;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct EntryMetadata {
    pub(crate) created_at: SystemTime,
    pub(crate) last_accessed: SystemTime,
    pub(crate) access_count: u64,
    pub(crate) size_bytes: u64,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct CachedEntry {
    pub(crate) version: u32,
    pub(crate) key: CacheKey,
    pub(crate) result: CheckResult,
    pub(crate) metadata: EntryMetadata,
}

#[derive(Debug)]
pub(crate) enum Lookup {
    Hit(CheckResult),
    Miss,
    Expired,
}

impl Lookup {
    pub(crate) fn into_hit(self) -> Option<CheckResult> {
        match self {
            Lookup::Hit(result) => Some(result),
            Lookup::Miss | Lookup::Expired => None,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub(crate) struct CacheStats {
    pub(crate) entries: usize,
    pub(crate) size_bytes: u64,
    pub(crate) hit_count: u64,
    pub(crate) miss_count: u64,
    pub(crate) hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) oldest_entry: Option<SystemTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) newest_entry: Option<SystemTime>,
}

/// Result memoisation. The disabled cache is a null object
/// ([`NopCache`]), not a flag threaded through call sites.
pub(crate) trait ResultCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Lookup;
    fn put(&self, key: &CacheKey, result: &CheckResult);
    fn invalidate(&self, key: &CacheKey);
    fn invalidate_all(&self);
    fn cleanup(&self) -> usize;
    fn stats(&self) -> CacheStats;
    fn enabled(&self) -> bool {
        true
    }
}

/// Cache that never hits and never stores.
#[derive(Debug)]
pub(crate) struct NopCache;

impl ResultCache for NopCache {
    fn get(&self, _key: &CacheKey) -> Lookup {
        Lookup::Miss
    }

    fn put(&self, _key: &CacheKey, _result: &CheckResult) {}

    fn invalidate(&self, _key: &CacheKey) {}

    fn invalidate_all(&self) {}

    fn cleanup(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn enabled(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct Inner {
    store: Store,
    /// Zero means no age bound.
    max_age: Duration,
    /// Zero means no size bound.
    max_size: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Serialises cleanup passes.
    cleanup_lock: Mutex<()>,
}

/// Filesystem-backed cache manager: policy (validation, expiry, LRU
/// eviction, statistics) layered over the atomic [`Store`].
#[derive(Clone, Debug)]
pub(crate) struct DiskCache {
    inner: Arc<Inner>,
}

impl DiskCache {
    pub(crate) fn new(base: &Path, max_age: Duration, max_size: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Store::new(base),
                max_age,
                max_size,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                cleanup_lock: Mutex::new(()),
            }),
        }
    }

    fn miss(&self) -> Lookup {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        Lookup::Miss
    }
}

impl ResultCache for DiskCache {
    fn get(&self, key: &CacheKey) -> Lookup {
        if !key.is_valid() {
            return self.miss();
        }
        let payload = match self.inner.store.read(key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return self.miss(),
            Err(e) => {
                debug!("Cache read failed: {e:#}");
                return self.miss();
            }
        };
        let mut entry: CachedEntry = match serde_json::from_slice(&payload) {
            Ok(entry) => entry,
            Err(e) => {
                // quietly repaired: delete and re-run
                warn!(
                    "{} ({e})",
                    crate::error::Error::CacheCorrupted(key.printable())
                );
                drop(self.inner.store.delete(key));
                return self.miss();
            }
        };
        if entry.version != ENTRY_VERSION {
            debug!(
                "Cache entry version {} != {}, treating as miss",
                entry.version, ENTRY_VERSION
            );
            return self.miss();
        }
        if expired(&entry, self.inner.max_age) {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            drop(self.inner.store.delete(key));
            return Lookup::Expired;
        }

        entry.metadata.last_accessed = SystemTime::now();
        entry.metadata.access_count += 1;
        // persist the touch synchronously so statistics survive the process
        match serde_json::to_vec(&entry) {
            Ok(payload) => {
                if let Err(e) = self.inner.store.write(key, &payload) {
                    debug!("Failed to persist cache metadata: {e:#}");
                }
            }
            Err(e) => debug!("Failed to serialise cache metadata: {e}"),
        }
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Lookup::Hit(entry.result)
    }

    fn put(&self, key: &CacheKey, result: &CheckResult) {
        // only successful checks are worth remembering
        if !key.is_valid() || !result.success {
            return;
        }
        let now = SystemTime::now();
        let mut entry = CachedEntry {
            version: ENTRY_VERSION,
            key: key.clone(),
            result: result.clone(),
            metadata: EntryMetadata {
                created_at: now,
                last_accessed: now,
                access_count: 0,
                size_bytes: 0,
            },
        };
        let Ok(probe) = serde_json::to_vec(&entry) else {
            return;
        };
        entry.metadata.size_bytes = probe.len() as u64;
        let Ok(payload) = serde_json::to_vec(&entry) else {
            return;
        };
        if let Err(e) = self.inner.store.write(key, &payload) {
            debug!("Cache write failed (continuing uncached): {e:#}");
            return;
        }
        if self.inner.max_size > 0 {
            let high_water = (self.inner.max_size as f64 * HIGH_WATER) as u64;
            if self.inner.store.total_size() > high_water {
                let cache = self.clone();
                thread::spawn(move || {
                    let removed = cache.cleanup();
                    debug!("Background cleanup removed {removed} entries");
                });
            }
        }
    }

    fn invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.inner.store.delete(key) {
            debug!("Cache invalidation failed: {e:#}");
        }
    }

    fn invalidate_all(&self) {
        if let Err(e) = self.inner.store.clear() {
            debug!("Cache clear failed: {e:#}");
        }
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
    }

    fn cleanup(&self) -> usize {
        // sweep unreadable/non-JSON files first, then apply policy
        let corrupted = self.inner.store.cleanup_corrupted();
        corrupted + cleanup_inner(&self.inner)
    }

    fn stats(&self) -> CacheStats {
        let mut entries = 0;
        let mut size_bytes = 0;
        let mut oldest: Option<SystemTime> = None;
        let mut newest: Option<SystemTime> = None;
        for path in self.inner.store.entries() {
            entries += 1;
            if let Ok(md) = std::fs::metadata(&path) {
                size_bytes += md.len();
            }
            if let Some(entry) = read_entry(&path) {
                let created = entry.metadata.created_at;
                oldest = Some(oldest.map_or(created, |o| o.min(created)));
                newest = Some(newest.map_or(created, |n| n.max(created)));
            }
        }
        let hit_count = self.inner.hits.load(Ordering::Relaxed);
        let miss_count = self.inner.misses.load(Ordering::Relaxed);
        let total = hit_count + miss_count;
        CacheStats {
            entries,
            size_bytes,
            hit_count,
            miss_count,
            hit_rate: if total == 0 {
                0.0
            } else {
                hit_count as f64 / total as f64
            },
            oldest_entry: oldest,
            newest_entry: newest,
        }
    }
}

fn expired(entry: &CachedEntry, max_age: Duration) -> bool {
    if max_age.is_zero() {
        return false;
    }
    entry
        .metadata
        .created_at
        .elapsed()
        .is_ok_and(|age| age > max_age)
}

fn read_entry(path: &Path) -> Option<CachedEntry> {
    let payload = std::fs::read(path).ok()?;
    serde_json::from_slice(&payload).ok()
}

/// Two-phase cleanup, exclusive under the cleanup lock: the age phase
/// deletes expired, corrupt, and version-mismatched entries; the size
/// phase evicts least-recently-accessed entries until the store fits.
fn cleanup_inner(inner: &Inner) -> usize {
    #[allow(clippy::unwrap_used)] // poisoning only follows a panic
    let _guard = inner.cleanup_lock.lock().unwrap();
    let mut removed = 0;

    let mut survivors: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    for path in inner.store.entries() {
        let size = std::fs::metadata(&path).map(|md| md.len()).unwrap_or(0);
        let keep = match read_entry(&path) {
            Some(entry) if entry.version != ENTRY_VERSION => None,
            Some(entry) if expired(&entry, inner.max_age) => None,
            Some(entry) => Some(entry.metadata.last_accessed),
            None => None,
        };
        match keep {
            Some(last_accessed) => survivors.push((path, last_accessed, size)),
            None => {
                if inner.store.delete_path(&path).is_ok() {
                    removed += 1;
                }
            }
        }
    }

    if inner.max_size > 0 {
        let mut total: u64 = survivors.iter().map(|(_, _, size)| size).sum();
        survivors.sort_by_key(|(_, last_accessed, _)| *last_accessed);
        let mut victims = survivors.iter();
        while total > inner.max_size {
            let Some((path, _, size)) = victims.next() else {
                break;
            };
            if inner.store.delete_path(path).is_ok() {
                removed += 1;
                total -= size;
            }
        }
    }
    removed
}
