//! Sandboxed file access for Jsonnet imports.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Import Access Flow                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  (from, imported) ──► candidate = clean(dir / imported)     │
//! │                           │                                 │
//! │                           ├─► is_allowed(candidate, roots)  │
//! │                           │   └─► no: access denied         │
//! │                           │                                 │
//! │                           └─► ReadThroughCache::get         │
//! │                               ├─► hit: Present / Missing    │
//! │                               └─► miss: FileSystem::read    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The search order over directories lives in [`crate::resolver`]; this
//! module only answers "may I read this path" and "what is at this path".

mod access;
mod cache;
mod fs;
mod sandbox;

pub use access::AccessLog;
pub use cache::{CacheEntry, CacheStats, ReadThroughCache};
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use sandbox::{absolutize, clean_path, is_allowed, AllowedRoots};
