//! # jsonnet-sandbox
//!
//! Evaluate Jsonnet configuration files with imports confined to a set of
//! allowed directories.
//!
//! Every import goes through an [`ImportResolver`], which:
//!
//! - **Searches** next to the importing file first, then the library paths,
//!   later paths taking priority
//! - **Sandboxes** each candidate path against the allowed roots, refusing
//!   anything that escapes with `access denied: <import> is outside of
//!   allowed directories`
//! - **Caches** reads (including misses) for the lifetime of one parse
//!
//! ## Quick Start
//!
//! ```no_run
//! use jsonnet_sandbox::Parser;
//!
//! // Imports may reach the working directory and /etc/myapp/lib only.
//! let parser = Parser::builder().library_path("/etc/myapp/lib").build();
//! let config: serde_json::Value = parser.unmarshal(b"import 'app.jsonnet'")?;
//! # Ok::<(), jsonnet_sandbox::ParseError>(())
//! ```
//!
//! ## Modules
//!
//! - [`parser`]: High-level parse-and-decode API
//! - [`resolver`]: Import search order and sandbox enforcement
//! - [`mod@file`]: Path sandboxing, read-through cache, filesystem seam
//! - [`engine`]: The Jsonnet evaluator
//! - [`diagnostic`]: Error formatting
//! - [`config`]: Process-wide defaults
//! - [`output`]: Policy check report rendering

#![forbid(unsafe_code)]

pub mod config;
pub mod diagnostic;
pub mod engine;
pub mod file;
pub mod output;
pub mod parser;
pub mod prelude;
pub mod resolver;

#[cfg(feature = "batch")]
pub mod batch;

// =============================================================================
// Parsing
// =============================================================================

pub use parser::{ParseError, Parsed, Parser, ParserBuilder};

#[cfg(feature = "batch")]
pub use batch::Batcher;

// =============================================================================
// Import Resolution
// =============================================================================

pub use resolver::{ImportResolver, ResolveError, ResolvedImport};

pub use file::{AllowedRoots, FileSystem, MemoryFileSystem, OsFileSystem};

// =============================================================================
// Engine & Diagnostics
// =============================================================================

pub use engine::{EvalError, EvalErrorKind, Importer, Location};

pub use diagnostic::{format_error, DiagnosticOptions, DisplayStyle};
