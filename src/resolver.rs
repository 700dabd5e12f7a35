//! Import resolution across the importing directory and library paths.
//!
//! # Search Order
//!
//! 1. The directory of the importing file (or the first library path when
//!    the import comes from an anonymous snippet).
//! 2. Library paths, last-declared first.
//!
//! The first candidate that exists wins. A candidate outside the allowed
//! roots aborts the whole lookup with [`ResolveError::AccessDenied`], even if
//! a later root would have matched.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::engine::Importer;
use crate::file::{
    clean_path, is_allowed, AccessLog, AllowedRoots, FileSystem, OsFileSystem, ReadThroughCache,
};

// =============================================================================
// Types
// =============================================================================

/// A file located by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    /// Raw file contents.
    pub contents: Arc<[u8]>,
    /// Absolute path the contents were read from.
    pub found_at: PathBuf,
}

/// Resolution failure. Absence is not an error; see [`ImportResolver::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The candidate path fell outside every allowed root.
    ///
    /// `path` is the import string as written, not the resolved path.
    #[error("access denied: {path} is outside of allowed directories")]
    AccessDenied {
        /// The import string as written in the document.
        path: String,
    },

    /// Reading an admitted path failed for a reason other than "not found".
    #[error("read {}: {source}", path.display())]
    Io {
        /// The resolved absolute path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    /// Whether this is a sandbox violation.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}

// =============================================================================
// ImportResolver
// =============================================================================

/// Sandboxed, caching import resolver.
///
/// One resolver corresponds to one resolution session: its cache and access
/// log live exactly as long as it does.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use std::sync::Arc;
/// use jsonnet_sandbox::{AllowedRoots, ImportResolver, MemoryFileSystem};
///
/// let mut fs = MemoryFileSystem::new();
/// fs.insert("/a/valid.libsonnet", r#"{ "key": "value" }"#);
///
/// let roots = AllowedRoots::new("/a", ["/a"]).unwrap();
/// let resolver = ImportResolver::new(roots, Arc::new(fs));
///
/// let found = resolver
///     .resolve(Path::new("/a/main"), "./valid.libsonnet")
///     .unwrap()
///     .unwrap();
/// assert_eq!(found.found_at, Path::new("/a/valid.libsonnet"));
///
/// let err = resolver.resolve(Path::new("/a/main"), "../outside.libsonnet").unwrap_err();
/// assert!(err.is_access_denied());
/// ```
#[derive(Debug)]
pub struct ImportResolver {
    roots: AllowedRoots,
    cache: ReadThroughCache,
    accessed: AccessLog,
}

impl ImportResolver {
    /// Create a resolver reading through `fs`.
    pub fn new(roots: AllowedRoots, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            roots,
            cache: ReadThroughCache::new(fs),
            accessed: AccessLog::new(),
        }
    }

    /// Create a resolver over the real filesystem.
    pub fn with_os_fs(roots: AllowedRoots) -> Self {
        Self::new(roots, Arc::new(OsFileSystem))
    }

    /// The roots this resolver admits.
    pub fn roots(&self) -> &AllowedRoots {
        &self.roots
    }

    /// The session cache.
    pub fn cache(&self) -> &ReadThroughCache {
        &self.cache
    }

    /// Files served so far, in first-served order.
    pub fn accessed_files(&self) -> Vec<PathBuf> {
        self.accessed.files()
    }

    /// Resolve `imported` as seen from the document at `from`.
    ///
    /// `from` is empty for anonymous snippets. Returns `Ok(None)` when no
    /// root contains the file.
    pub fn resolve(
        &self,
        from: &Path,
        imported: &str,
    ) -> Result<Option<ResolvedImport>, ResolveError> {
        let library = self.roots.library();

        let start = if !from.as_os_str().is_empty() {
            Some(from.parent().unwrap_or(from))
        } else {
            library.first().map(PathBuf::as_path)
        };

        if let Some(dir) = start
            && let Some(found) = self.try_dir(dir, imported)?
        {
            return Ok(Some(found));
        }

        for dir in library.iter().rev() {
            if let Some(found) = self.try_dir(dir, imported)? {
                return Ok(Some(found));
            }
        }

        debug!(from = %from.display(), imported, "import not found in any root");
        Ok(None)
    }

    /// Check one candidate directory.
    fn try_dir(&self, dir: &Path, imported: &str) -> Result<Option<ResolvedImport>, ResolveError> {
        let candidate = clean_path(&dir.join(imported));

        if !is_allowed(&candidate, &self.roots) {
            debug!(candidate = %candidate.display(), imported, "import denied by sandbox");
            return Err(ResolveError::AccessDenied {
                path: imported.to_owned(),
            });
        }

        let contents = self
            .cache
            .get(&candidate)
            .map_err(|source| ResolveError::Io {
                path: candidate.clone(),
                source,
            })?;

        Ok(contents.map(|contents| {
            self.accessed.record(&candidate);
            ResolvedImport {
                contents,
                found_at: candidate,
            }
        }))
    }
}

impl Importer for ImportResolver {
    fn import(&self, from: &Path, imported: &str) -> Result<Option<ResolvedImport>, ResolveError> {
        self.resolve(from, imported)
    }
}

// =============================================================================
// Tests
// =============================================================================
