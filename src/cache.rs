//! Module cache keyed by resolved absolute path.
//!
//! Each entry pairs the module source with a fingerprint (file length +
//! modification time). Lookups re-stat the file; a changed fingerprint
//! refreshes the entry in place, so edited modules are picked up on the next
//! render without a process restart. Entries are `Arc`-swapped under a
//! read/write lock: concurrent readers share entries and never block each
//! other, writers replace single entries. No capacity-based eviction.
//!
//! Compilation happens inside each evaluation context; the cache only holds
//! fingerprinted source. A module that fails to compile is therefore retried
//! on every access and never pinned in a broken state.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

/// Change detector for a module file: size + mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    len: u64,
    mtime: Option<SystemTime>,
}

impl Fingerprint {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            // Some filesystems don't report mtime; length alone still catches
            // most edits.
            mtime: metadata.modified().ok(),
        }
    }
}

/// A cached module: source text plus the fingerprint it was read under.
#[derive(Debug)]
pub(crate) struct ModuleEntry {
    pub(crate) fingerprint: Fingerprint,
    pub(crate) source: Arc<str>,
}

/// Process-wide (per-gateway) module cache. Shared by concurrent renders.
#[derive(Debug, Default)]
pub(crate) struct ModuleCache {
    entries: RwLock<HashMap<PathBuf, Arc<ModuleEntry>>>,
}

impl ModuleCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the cached entry for `path`, re-reading the file if its
    /// fingerprint changed since it was cached.
    pub(crate) fn load(&self, path: &Path) -> io::Result<Arc<ModuleEntry>> {
        let metadata = fs::metadata(path)?;
        let current = Fingerprint::of(&metadata);

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(path) {
                if entry.fingerprint == current {
                    return Ok(Arc::clone(entry));
                }
            }
        }

        tracing::debug!(path = %path.display(), "module cache refresh");
        let source: Arc<str> = fs::read_to_string(path)?.into();
        let entry = Arc::new(ModuleEntry {
            fingerprint: current,
            source,
        });

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(path.to_path_buf(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Drop every cached entry. Exposed through the gateway for tests.
    pub(crate) fn invalidate_all(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
