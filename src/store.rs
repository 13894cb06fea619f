use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context as _, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::key::CacheKey;

const RESULTS_DIR: &str = "results";
const TMP_SUFFIX: &str = "tmp";

/// Sharded filesystem store: `{base}/results/{tool}/{shard}/{key}.json`.
/// A single reader-writer lock serialises in-process access; cross-process
/// coordination is out of scope. Atomic-rename semantics are assumed
/// (POSIX, NTFS); on filesystems without them the store is best-effort.
#[derive(Debug)]
pub(crate) struct Store {
    base: PathBuf,
    lock: RwLock<()>,
}

impl Store {
    pub(crate) fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    fn results_dir(&self) -> PathBuf {
        self.base.join(RESULTS_DIR)
    }

    pub(crate) fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.results_dir()
            .join(crate::key::tool_dir(&key.tool_name))
            .join(key.shard())
            .join(format!("{}.json", key.printable()))
    }

    /// Write via a `.tmp` sibling and rename, so readers never observe a
    /// partial entry. The temp file is removed if the rename fails.
    pub(crate) fn write(&self, key: &CacheKey, payload: &[u8]) -> Result<()> {
        #[allow(clippy::unwrap_used)] // poisoning only follows a panic
        let _guard = self.lock.write().unwrap();
        let path = self.entry_path(key);
        #[allow(clippy::unwrap_used)] // entry_path always has a parent
        let parent = path.parent().unwrap();
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create shard directory: {}", parent.display()))?;
        let tmp = path.with_extension(TMP_SUFFIX);
        fs::write(&tmp, payload)
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            drop(fs::remove_file(&tmp));
            return Err(e)
                .with_context(|| format!("Failed to finalise cache entry: {}", path.display()));
        }
        Ok(())
    }

    /// `Ok(None)` is a miss; anything else that fails to read is an error
    /// for the caller to map.
    pub(crate) fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        #[allow(clippy::unwrap_used)]
        let _guard = self.lock.read().unwrap();
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read cache entry: {}", path.display()))
            }
        }
    }

    /// Deleting an absent key is a no-op. The emptied shard directory is
    /// removed best-effort.
    pub(crate) fn delete(&self, key: &CacheKey) -> Result<()> {
        #[allow(clippy::unwrap_used)]
        let _guard = self.lock.write().unwrap();
        self.delete_locked(&self.entry_path(key))
    }

    pub(crate) fn delete_path(&self, path: &Path) -> Result<()> {
        #[allow(clippy::unwrap_used)]
        let _guard = self.lock.write().unwrap();
        self.delete_locked(path)
    }

    fn delete_locked(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to delete cache entry: {}", path.display()));
            }
        }
        if let Some(shard) = path.parent() {
            // fails while the shard still has entries, which is fine
            drop(fs::remove_dir(shard));
        }
        Ok(())
    }

    /// Paths of all entries. Directories and in-flight `.tmp` files are
    /// skipped.
    pub(crate) fn entries(&self) -> Vec<PathBuf> {
        #[allow(clippy::unwrap_used)]
        let _guard = self.lock.read().unwrap();
        self.entries_locked()
    }

    fn entries_locked(&self) -> Vec<PathBuf> {
        WalkDir::new(self.results_dir())
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_none_or(|ext| ext != TMP_SUFFIX))
            .collect()
    }

    /// Total byte size of all entries.
    pub(crate) fn total_size(&self) -> u64 {
        #[allow(clippy::unwrap_used)]
        let _guard = self.lock.read().unwrap();
        self.entries_locked()
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|md| md.len())
            .sum()
    }

    /// Delete entries that cannot be read or whose first byte is neither
    /// `{` nor `[`. Returns the number removed.
    pub(crate) fn cleanup_corrupted(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let _guard = self.lock.write().unwrap();
        let mut removed = 0;
        for path in self.entries_locked() {
            let corrupt = match fs::read(&path) {
                Ok(payload) => !matches!(payload.first(), Some(b'{' | b'[')),
                Err(_) => true,
            };
            if corrupt {
                warn!("Removing corrupted cache entry: {}", path.display());
                if self.delete_locked(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Remove every entry.
    pub(crate) fn clear(&self) -> Result<()> {
        #[allow(clippy::unwrap_used)]
        let _guard = self.lock.write().unwrap();
        let dir = self.results_dir();
        if dir.exists() {
            debug!("Clearing cache store at {}", dir.display());
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear cache store: {}", dir.display()))?;
        }
        Ok(())
    }
}
