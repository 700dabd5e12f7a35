//! Filesystem capability used by the import cache.
//!
//! The resolver never calls `std::fs` directly; it reads through a
//! [`FileSystem`], so tests and embedders can substitute an in-memory tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::sandbox::clean_path;

// =============================================================================
// FileSystem Trait
// =============================================================================

/// Read access to files by absolute path.
///
/// A missing file must be reported as [`io::ErrorKind::NotFound`]; every other
/// error kind is treated as a real failure by the cache.
///
/// # Example
///
/// ```
/// use std::io;
/// use std::path::Path;
/// use jsonnet_sandbox::FileSystem;
///
/// struct Empty;
///
/// impl FileSystem for Empty {
///     fn read(&self, _path: &Path) -> io::Result<Vec<u8>> {
///         Err(io::ErrorKind::NotFound.into())
///     }
/// }
/// ```
pub trait FileSystem: Send + Sync {
    /// Read the whole file at `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

// =============================================================================
// OsFileSystem
// =============================================================================

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

// =============================================================================
// MemoryFileSystem
// =============================================================================

/// An in-memory file tree with per-path read counters.
///
/// Paths are cleaned on insert and lookup. Failures other than "not found"
/// can be injected with [`insert_failure`](Self::insert_failure).
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use jsonnet_sandbox::{FileSystem, MemoryFileSystem};
///
/// let mut fs = MemoryFileSystem::new();
/// fs.insert("/a/valid.libsonnet", r#"{ "key": "value" }"#);
///
/// assert!(fs.read(Path::new("/a/valid.libsonnet")).is_ok());
/// assert_eq!(fs.read_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: FxHashMap<PathBuf, Vec<u8>>,
    failures: FxHashMap<PathBuf, io::ErrorKind>,
    reads: Mutex<FxHashMap<PathBuf, usize>>,
}

impl MemoryFileSystem {
    /// Create an empty file tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file with the given contents.
    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        self.files
            .insert(clean_path(path.as_ref()), contents.as_ref().to_vec());
    }

    /// Make every read of `path` fail with `kind`.
    pub fn insert_failure(&mut self, path: impl AsRef<Path>, kind: io::ErrorKind) {
        self.failures.insert(clean_path(path.as_ref()), kind);
    }

    /// Remove a file.
    pub fn remove(&mut self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.remove(&clean_path(path.as_ref()))
    }

    /// Whether a file exists at `path`.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.contains_key(&clean_path(path.as_ref()))
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tree holds no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total reads issued so far, including failed ones.
    pub fn read_count(&self) -> usize {
        self.reads.lock().values().sum()
    }

    /// Reads issued for one path.
    pub fn reads_of(&self, path: impl AsRef<Path>) -> usize {
        self.reads
            .lock()
            .get(&clean_path(path.as_ref()))
            .copied()
            .unwrap_or(0)
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let path = clean_path(path);
        *self.reads.lock().entry(path.clone()).or_default() += 1;

        if let Some(kind) = self.failures.get(&path) {
            return Err(io::Error::new(*kind, format!("{}: injected failure", path.display())));
        }
        self.files
            .get(&path)
            .cloned()
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }
}

// =============================================================================
// Tests
// =============================================================================
