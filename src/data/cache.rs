use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Fingerprint – identity of a set of source files
// ---------------------------------------------------------------------------

/// SHA-256 over (name, size, mtime) of each source file. A changed, added or
/// removed file changes the fingerprint; file contents are not read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a file set. Order of `files` does not matter.
    pub fn of_files<'a, I>(files: I) -> Fingerprint
    where
        I: IntoIterator<Item = FileStamp<'a>>,
    {
        let mut stamps: Vec<FileStamp<'a>> = files.into_iter().collect();
        stamps.sort_by(|a, b| a.path.cmp(b.path));

        let mut hasher = Sha256::new();
        for s in &stamps {
            hasher.update(s.path.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(s.len.to_le_bytes());
            hasher.update(s.modified_nanos.to_le_bytes());
        }
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The filesystem facts a fingerprint is built from.
#[derive(Debug, Clone, Copy)]
pub struct FileStamp<'a> {
    pub path: &'a Path,
    pub len: u64,
    pub modified_nanos: u128,
}

impl<'a> FileStamp<'a> {
    /// Stamp a path from its metadata. A missing file stamps as zero so the
    /// fingerprint still changes when it appears.
    pub fn read(path: &'a Path) -> FileStamp<'a> {
        match std::fs::metadata(path) {
            Ok(meta) => FileStamp {
                path,
                len: meta.len(),
                modified_nanos: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or(0),
            },
            Err(_) => FileStamp {
                path,
                len: 0,
                modified_nanos: 0,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// DatasetCache – guarded compute-if-absent slot
// ---------------------------------------------------------------------------

struct CacheEntry<T> {
    fingerprint: Fingerprint,
    value: Arc<T>,
}

/// Holds at most one value, keyed by the fingerprint it was computed for.
///
/// The lock is held while a value is computed, so concurrent first requests
/// for the same fingerprint wait for the one load instead of repeating it.
pub struct DatasetCache<T> {
    slot: Mutex<Option<CacheEntry<T>>>,
}

impl<T> DatasetCache<T> {
    pub const fn new() -> Self {
        DatasetCache {
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value for `fingerprint`, or compute and store it.
    /// A failed computation leaves the previous entry untouched.
    pub fn get_or_try_insert_with<E, F>(&self, fingerprint: &Fingerprint, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut slot = self.lock();
        if let Some(entry) = slot.as_ref() {
            if &entry.fingerprint == fingerprint {
                log::debug!("cache hit for fingerprint {}", fingerprint.short());
                return Ok(Arc::clone(&entry.value));
            }
            log::info!(
                "source files changed ({} -> {}), reloading",
                entry.fingerprint.short(),
                fingerprint.short()
            );
        }
        let value = Arc::new(load()?);
        *slot = Some(CacheEntry {
            fingerprint: fingerprint.clone(),
            value: Arc::clone(&value),
        });
        Ok(value)
    }

    /// Fingerprint of the cached value, if any.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.lock().as_ref().map(|e| e.fingerprint.clone())
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    // The slot is only ever assigned complete entries, so a panic in a
    // loader cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, Option<CacheEntry<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for DatasetCache<T> {
    fn default() -> Self {
        DatasetCache::new()
    }
}
