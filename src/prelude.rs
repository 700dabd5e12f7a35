//! Prelude module for convenient imports.
//!
//! ```
//! use jsonnet_sandbox::prelude::*;
//! ```

// Parsing
pub use crate::parser::{ParseError, Parsed, Parser, ParserBuilder};
#[cfg(feature = "batch")]
pub use crate::batch::Batcher;

// Resolution
pub use crate::file::{AllowedRoots, FileSystem, MemoryFileSystem, OsFileSystem};
pub use crate::resolver::{ImportResolver, ResolveError, ResolvedImport};

// Engine
pub use crate::engine::{EvalError, EvalErrorKind, Importer};

// Diagnostics
pub use crate::diagnostic::{format_error, DiagnosticOptions, DisplayStyle};

// Configuration
pub use crate::config::ConfigBuilder;
