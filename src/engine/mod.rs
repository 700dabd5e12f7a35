//! Jsonnet evaluation.
//!
//! A lazy evaluator covering the language configuration files use in
//! practice: objects with `self`, `super`, `$`, inheritance and hidden
//! fields; `local`, functions with default and named parameters,
//! comprehensions, slices, `assert`, `error`, and the three import forms.
//! `std` provides the commonly used part of the standard library.
//!
//! All file access goes through an [`Importer`], so the engine itself never
//! touches the filesystem.
//!
//! Evaluation runs on a dedicated thread with a large stack, and nesting is
//! bounded at parse time and at run time, so hostile input produces an error
//! rather than a stack overflow.
//!
//! ```
//! use jsonnet_sandbox::engine::{evaluate_snippet, Importer};
//! use jsonnet_sandbox::{ResolveError, ResolvedImport};
//! use std::path::Path;
//!
//! struct Nothing;
//! impl Importer for Nothing {
//!     fn import(&self, _: &Path, _: &str) -> Result<Option<ResolvedImport>, ResolveError> {
//!         Ok(None)
//!     }
//! }
//!
//! let json = evaluate_snippet(&Nothing, "{ a: 1 + 2, h:: 0 }").unwrap();
//! assert_eq!(json, "{\n   \"a\": 3\n}");
//! ```

mod ast;
mod error;
mod eval;
mod lexer;
mod stdlib;
mod syntax;
mod value;

use std::path::Path;
use std::str::Utf8Error;

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

pub use error::{EvalError, EvalErrorKind, EvalResult, Location};
pub use eval::ANONYMOUS;

use crate::resolver::{ResolveError, ResolvedImport};

/// Deepest expression tree the parser accepts.
pub(crate) const MAX_NESTING: usize = 1000;

/// Stack of the evaluation thread.
const STACK_SIZE: usize = 256 * 1024 * 1024;

/// Source of imported files.
///
/// `from` is the path of the importing document, or empty for the top-level
/// snippet. `Ok(None)` means the file was not found anywhere; the engine
/// turns that into [`EvalErrorKind::ImportNotFound`].
///
/// Evaluation happens on its own thread, hence the `Sync` bound.
pub trait Importer: Sync {
    fn import(&self, from: &Path, imported: &str) -> Result<Option<ResolvedImport>, ResolveError>;
}

impl<T: Importer + ?Sized> Importer for &T {
    fn import(&self, from: &Path, imported: &str) -> Result<Option<ResolvedImport>, ResolveError> {
        (**self).import(from, imported)
    }
}

/// Evaluate an anonymous snippet and render the result as JSON text.
///
/// Relative imports in the snippet are looked up in the library paths only.
pub fn evaluate_snippet(importer: &dyn Importer, source: &str) -> EvalResult<String> {
    run(importer, None, source)
}

/// Evaluate `source` as the contents of `path`.
///
/// Relative imports are looked up next to `path` first.
pub fn evaluate_file(importer: &dyn Importer, path: &Path, source: &str) -> EvalResult<String> {
    run(importer, Some(path), source)
}

fn run(importer: &dyn Importer, path: Option<&Path>, source: &str) -> EvalResult<String> {
    let json = on_large_stack(|| eval::Evaluator::new(importer).run(path, source))
        .map_err(|e| EvalError::new(EvalErrorKind::Runtime(format!("spawn evaluation thread: {e}"))))??;
    to_json_text(&json).map_err(|e| EvalError::new(EvalErrorKind::Runtime(e.to_string())))
}

/// Run `f` on a scoped thread with [`STACK_SIZE`] bytes of stack.
///
/// A panic in `f` is resumed on the calling thread.
pub(crate) fn on_large_stack<T: Send>(f: impl FnOnce() -> T + Send) -> std::io::Result<T> {
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("jsonnet-eval".into())
            .stack_size(STACK_SIZE)
            .spawn_scoped(scope, f)?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

/// Pretty-print with a three-space indent.
fn to_json_text(value: &serde_json::Value) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"   "));
    value.serialize(&mut serializer)?;
    // serde_json only ever writes valid UTF-8.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Decode bytes as UTF-8, stripping a BOM if present.
pub(crate) fn decode_utf8(buf: &[u8]) -> Result<&str, Utf8Error> {
    let buf = buf.strip_prefix(b"\xef\xbb\xbf").unwrap_or(buf);
    std::str::from_utf8(buf)
}
