//! Jsonnet configuration parser.
//!
//! Each call builds a fresh [`ImportResolver`] rooted at the working
//! directory (or the configured base directory), evaluates the document,
//! and decodes the resulting JSON.
//!
//! # Example
//!
//! ```
//! use jsonnet_sandbox::Parser;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Service {
//!     name: String,
//!     replicas: u32,
//! }
//!
//! let parser = Parser::new();
//! let service: Service = parser
//!     .unmarshal(br#"local n = 'api'; { name: n, replicas: 1 + 2 }"#)
//!     .unwrap();
//! assert_eq!(service.name, "api");
//! assert_eq!(service.replicas, 3);
//! ```

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::engine::{self, EvalError, EvalErrorKind};
use crate::file::{absolutize, AllowedRoots, FileSystem, OsFileSystem};
use crate::resolver::{ImportResolver, ResolveError};

// =============================================================================
// Errors
// =============================================================================

/// Failure to turn a Jsonnet document into a value.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The working directory could not be determined.
    #[error("determine working directory: {0}")]
    WorkingDirectory(#[source] io::Error),

    /// The document file could not be read.
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Jsonnet evaluation failed, including refused or failed imports.
    #[error("evaluate document: {0}")]
    Evaluation(#[source] EvalError),

    /// The evaluated JSON did not match the target type.
    #[error("decode json: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ParseError {
    /// The resolver error behind this failure, if any.
    pub fn resolve_error(&self) -> Option<&ResolveError> {
        match self {
            Self::Evaluation(err) => err.resolve_error(),
            _ => None,
        }
    }

    /// The evaluation error, for [`format_error`](crate::diagnostic::format_error).
    pub fn eval_error(&self) -> Option<&EvalError> {
        match self {
            Self::Evaluation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EvalError> for ParseError {
    fn from(err: EvalError) -> Self {
        Self::Evaluation(err)
    }
}

// =============================================================================
// Parser
// =============================================================================

/// A decoded document together with the files it imported.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub value: T,
    /// Every file served to the engine, in first-import order.
    pub dependencies: Vec<PathBuf>,
}

/// Parses Jsonnet documents with sandboxed imports.
///
/// Allowed roots are the base directory plus the library paths
/// `[base, ..config::get().library_paths, ..extra]`, so by default the working
/// directory is both the base and the only library path.
#[derive(Clone)]
pub struct Parser {
    base_dir: Option<PathBuf>,
    library_paths: Vec<PathBuf>,
    fs: Arc<dyn FileSystem>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("base_dir", &self.base_dir)
            .field("library_paths", &self.library_paths)
            .finish_non_exhaustive()
    }
}

impl Parser {
    /// Parser rooted at the working directory, reading from disk.
    pub fn new() -> Self {
        ParserBuilder::new().build()
    }

    /// Create a builder.
    pub fn builder() -> ParserBuilder {
        ParserBuilder::new()
    }

    /// Compute the allowed roots for one parse.
    pub fn roots(&self) -> Result<AllowedRoots, ParseError> {
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir().map_err(ParseError::WorkingDirectory)?,
        };

        let library = std::iter::once(base.clone())
            .chain(crate::config::get().library_paths.iter().cloned())
            .chain(self.library_paths.iter().cloned());

        AllowedRoots::new(&base, library).map_err(ParseError::WorkingDirectory)
    }

    /// A fresh resolver with its own empty cache.
    pub fn resolver(&self) -> Result<ImportResolver, ParseError> {
        Ok(ImportResolver::new(self.roots()?, Arc::clone(&self.fs)))
    }

    /// Evaluate a document and return the JSON text.
    pub fn evaluate(&self, data: &[u8]) -> Result<String, ParseError> {
        let resolver = self.resolver()?;
        self.evaluate_with(&resolver, None, data)
    }

    /// Evaluate and decode a document.
    ///
    /// Use `serde_json::Value` as `T` to accept any shape.
    pub fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ParseError> {
        Ok(self.unmarshal_with_deps(data)?.value)
    }

    /// Like [`unmarshal`](Self::unmarshal), also returning the imported files.
    pub fn unmarshal_with_deps<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<Parsed<T>, ParseError> {
        let resolver = self.resolver()?;
        let json = self.evaluate_with(&resolver, None, data)?;
        decode(&json, &resolver)
    }

    /// Read, evaluate and decode a file.
    ///
    /// Relative imports are looked up next to the file first. A relative
    /// `path` is taken relative to the base directory.
    pub fn unmarshal_file<T: DeserializeOwned>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Parsed<T>, ParseError> {
        let resolver = self.resolver()?;
        let path = resolver.roots().base().join(path.as_ref());
        let path = absolutize(&path).map_err(ParseError::WorkingDirectory)?;

        let data = self.fs.read(&path).map_err(|source| ParseError::Read {
            path: path.clone(),
            source,
        })?;
        let json = self.evaluate_with(&resolver, Some(&path), &data)?;
        decode(&json, &resolver)
    }

    fn evaluate_with(
        &self,
        resolver: &ImportResolver,
        path: Option<&Path>,
        data: &[u8],
    ) -> Result<String, ParseError> {
        let source = engine::decode_utf8(data).map_err(|e| {
            EvalError::new(EvalErrorKind::Syntax(format!("document is not valid UTF-8: {e}")))
        })?;

        tracing::debug!(
            path = ?path,
            base = %resolver.roots().base().display(),
            library = ?resolver.roots().library(),
            "evaluating document"
        );

        let json = match path {
            Some(path) => engine::evaluate_file(resolver, path, source)?,
            None => engine::evaluate_snippet(resolver, source)?,
        };
        Ok(json)
    }
}

fn decode<T: DeserializeOwned>(json: &str, resolver: &ImportResolver) -> Result<Parsed<T>, ParseError> {
    let value = serde_json::from_str(json).map_err(ParseError::Decode)?;
    Ok(Parsed {
        value,
        dependencies: resolver.accessed_files(),
    })
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for configuring a [`Parser`].
#[derive(Default)]
pub struct ParserBuilder {
    base_dir: Option<PathBuf>,
    library_paths: Vec<PathBuf>,
    fs: Option<Arc<dyn FileSystem>>,
}

impl ParserBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `dir` instead of the working directory as base.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Append a library path. Later paths take priority.
    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_paths.push(path.into());
        self
    }

    /// Append several library paths.
    pub fn library_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.library_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Read files through `fs` instead of the OS.
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn build(self) -> Parser {
        Parser {
            base_dir: self.base_dir,
            library_paths: self.library_paths,
            fs: self.fs.unwrap_or_else(|| Arc::new(OsFileSystem)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::file::MemoryFileSystem;

    fn memory_parser(files: &[(&str, &str)]) -> Parser {
        let mut fs = MemoryFileSystem::new();
        for (path, contents) in files {
            fs.insert(*path, contents);
        }
        Parser::builder()
            .base_dir("/work")
            .library_path("/vendor")
            .file_system(Arc::new(fs))
            .build()
    }

    #[test]
    fn test_roots_default_to_base() {
        let parser = Parser::builder().base_dir("/work").build();
        let roots = parser.roots().unwrap();
        assert_eq!(roots.base(), Path::new("/work"));
        assert_eq!(roots.library().first().map(PathBuf::as_path), Some(Path::new("/work")));
    }

    #[test]
    fn test_unmarshal_untyped() {
        let parser = memory_parser(&[("/work/lib.libsonnet", "{ port: 8080 }")]);
        let value: serde_json::Value = parser
            .unmarshal(b"(import 'lib.libsonnet') + { host: 'localhost' }")
            .unwrap();
        assert_eq!(value, serde_json::json!({ "host": "localhost", "port": 8080 }));
    }

    #[test]
    fn test_unmarshal_typed() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Limits {
            cpu: f64,
            names: Vec<String>,
        }

        let parser = memory_parser(&[]);
        let limits: Limits = parser.unmarshal(b"{ cpu: 0.5, names: ['a', 'b'] }").unwrap();
        assert_eq!(
            limits,
            Limits {
                cpu: 0.5,
                names: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn test_decode_error() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Strict {
            count: u32,
        }

        let parser = memory_parser(&[]);
        let err = parser.unmarshal::<Strict>(b"{ count: 'many' }").unwrap_err();
        assert!(matches!(err, ParseError::Decode(_)));
        assert!(err.to_string().starts_with("decode json: "));
    }

    #[test]
    fn test_access_denied_is_wrapped() {
        let parser = memory_parser(&[]);
        let err = parser
            .unmarshal::<serde_json::Value>(b"import '../secret.json'")
            .unwrap_err();
        assert!(err.resolve_error().is_some_and(ResolveError::is_access_denied));
        assert!(
            err.to_string()
                .ends_with("access denied: ../secret.json is outside of allowed directories")
        );
        assert!(err.to_string().starts_with("evaluate document: "));
    }

    #[test]
    fn test_snippet_search_starts_at_base() {
        let parser = memory_parser(&[
            ("/work/dep.libsonnet", "'work'"),
            ("/vendor/dep.libsonnet", "'vendor'"),
        ]);
        // Snippets start in the first library path, which is the base.
        let value: String = parser.unmarshal(b"import 'dep.libsonnet'").unwrap();
        assert_eq!(value, "work");

        let value: String = parser.unmarshal(b"import 'sub/../dep.libsonnet'").unwrap();
        assert_eq!(value, "work");
    }

    #[test]
    fn test_library_fallback() {
        let parser = memory_parser(&[("/vendor/only.libsonnet", "{ v: 1 }")]);
        let value: serde_json::Value = parser.unmarshal(b"(import 'only.libsonnet').v").unwrap();
        assert_eq!(value, serde_json::json!(1));
    }

    #[test]
    fn test_unmarshal_file_tracks_dependencies() {
        let parser = memory_parser(&[
            ("/work/app/main.jsonnet", "{ common: import '../common.libsonnet', v: import 'v.libsonnet' }"),
            ("/work/common.libsonnet", "{ a: 1 }"),
            ("/work/app/v.libsonnet", "2"),
        ]);
        let parsed: Parsed<serde_json::Value> = parser.unmarshal_file("app/main.jsonnet").unwrap();
        assert_eq!(parsed.value, serde_json::json!({ "common": { "a": 1 }, "v": 2 }));
        assert_eq!(
            parsed.dependencies,
            vec![
                PathBuf::from("/work/common.libsonnet"),
                PathBuf::from("/work/app/v.libsonnet")
            ]
        );
    }

    #[test]
    fn test_unmarshal_file_missing() {
        let parser = memory_parser(&[]);
        let err = parser
            .unmarshal_file::<serde_json::Value>("/work/none.jsonnet")
            .unwrap_err();
        assert!(matches!(err, ParseError::Read { .. }));
    }

    #[test]
    fn test_each_call_gets_fresh_cache() {
        let parser = memory_parser(&[("/work/x.libsonnet", "1")]);
        let first = parser.unmarshal_with_deps::<u32>(b"import 'x.libsonnet'").unwrap();
        let second = parser.unmarshal_with_deps::<u32>(b"import 'x.libsonnet'").unwrap();
        assert_eq!(first.dependencies, second.dependencies);
        assert_eq!(first.value, 1);
    }

    #[test]
    fn test_evaluate_returns_json_text() {
        let parser = memory_parser(&[]);
        assert_eq!(parser.evaluate(b"[1]").unwrap(), "[\n   1\n]");
    }

    #[test]
    fn test_invalid_utf8_document() {
        let parser = memory_parser(&[]);
        let err = parser.evaluate(b"\xff").unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }
}
