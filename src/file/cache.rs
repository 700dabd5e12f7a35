//! Read-through file cache scoped to one resolution session.
//!
//! # Caching Strategy
//!
//! ```text
//! ReadThroughCache (owned by one ImportResolver)
//! └── FxHashMap<PathBuf, CacheEntry>
//!     ├── Present(bytes)  ── file read once, served from memory afterwards
//!     └── Missing         ── "not found" remembered, no second stat
//! ```
//!
//! Errors other than "not found" are never cached, so a transient failure
//! does not poison later lookups of the same path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::fs::FileSystem;

// =============================================================================
// CacheEntry
// =============================================================================

/// What a previous lookup found at a path. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// The path did not exist.
    Missing,
    /// The path held these bytes.
    Present(Arc<[u8]>),
}

impl CacheEntry {
    /// Contents, if the file existed.
    pub fn contents(&self) -> Option<Arc<[u8]>> {
        match self {
            Self::Missing => None,
            Self::Present(bytes) => Some(Arc::clone(bytes)),
        }
    }
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from memory.
    pub hits: u64,
    /// Lookups that went to the filesystem and produced an entry.
    pub misses: u64,
}

// =============================================================================
// ReadThroughCache
// =============================================================================

struct Inner {
    entries: FxHashMap<PathBuf, CacheEntry>,
    stats: CacheStats,
}

/// Memoizes file reads by absolute path.
///
/// The lock is held across the underlying read, so each path is read at most
/// once even when lookups race.
pub struct ReadThroughCache {
    fs: Arc<dyn FileSystem>,
    inner: Mutex<Inner>,
}

impl ReadThroughCache {
    /// Create an empty cache reading through `fs`.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            inner: Mutex::new(Inner {
                entries: FxHashMap::default(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up `path`, reading it on first use.
    ///
    /// Returns `Ok(None)` when the file does not exist. Any other I/O error
    /// is returned unchanged and leaves the cache untouched.
    pub fn get(&self, path: &Path) -> io::Result<Option<Arc<[u8]>>> {
        let mut inner = self.inner.lock();

        if let Some(contents) = inner.entries.get(path).map(CacheEntry::contents) {
            inner.stats.hits += 1;
            trace!(path = %path.display(), found = contents.is_some(), "import cache hit");
            return Ok(contents);
        }

        let entry = match self.fs.read(path) {
            Ok(bytes) => CacheEntry::Present(Arc::from(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => CacheEntry::Missing,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "import read failed");
                return Err(e);
            }
        };

        debug!(
            path = %path.display(),
            found = matches!(entry, CacheEntry::Present(_)),
            "import cache miss"
        );
        inner.stats.misses += 1;
        let contents = entry.contents();
        inner.entries.insert(path.to_path_buf(), entry);
        Ok(contents)
    }

    /// The recorded entry for `path`, without touching the filesystem.
    pub fn peek(&self, path: &Path) -> Option<CacheEntry> {
        self.inner.lock().entries.get(path).cloned()
    }

    /// Number of recorded entries (present and missing).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl std::fmt::Debug for ReadThroughCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReadThroughCache")
            .field("entries", &inner.entries.len())
            .field("stats", &inner.stats)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
