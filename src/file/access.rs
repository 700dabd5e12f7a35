//! Per-session tracking of files served to the engine.
//!
//! Used for dependency analysis: after a parse, the caller can ask which
//! files the document pulled in.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Ordered, de-duplicated record of served paths.
#[derive(Debug, Default)]
pub struct AccessLog {
    inner: Mutex<AccessInner>,
}

#[derive(Debug, Default)]
struct AccessInner {
    order: Vec<PathBuf>,
    seen: FxHashSet<PathBuf>,
}

impl AccessLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` was served. Repeats are ignored.
    pub fn record(&self, path: &Path) {
        let mut inner = self.inner.lock();
        if inner.seen.insert(path.to_path_buf()) {
            inner.order.push(path.to_path_buf());
        }
    }

    /// Paths in first-served order.
    pub fn files(&self) -> Vec<PathBuf> {
        self.inner.lock().order.clone()
    }

    /// Number of distinct paths.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether nothing was served.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}
