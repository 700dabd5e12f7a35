//! Evaluation error type.

use std::fmt;

use thiserror::Error;

use crate::resolver::ResolveError;

/// A position in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Display name of the file (`<anonymous>` for snippets).
    pub file: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, in characters.
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// What went wrong during evaluation.
#[derive(Debug, Error)]
pub enum EvalErrorKind {
    /// The document could not be tokenized or parsed.
    #[error("{0}")]
    Syntax(String),

    /// A runtime failure: type errors, missing fields, `error` expressions.
    #[error("{0}")]
    Runtime(String),

    /// The resolver refused or failed an import.
    #[error("{0}")]
    Import(#[source] ResolveError),

    /// No root contained the imported file.
    #[error("couldn't open import {path:?}: no match locally or in library search paths")]
    ImportNotFound {
        /// The import string as written.
        path: String,
    },

    /// A file imported itself, directly or transitively.
    #[error("import cycle detected: {path}")]
    ImportCycle {
        /// The file that closed the cycle.
        path: String,
    },
}

/// Evaluation failure with an optional source location.
///
/// `Display` renders `file:line:col: message`; use
/// [`format_error`](crate::diagnostic::format_error) for a snippet view.
#[derive(Debug)]
pub struct EvalError {
    kind: EvalErrorKind,
    location: Option<Location>,
    source_line: Option<String>,
}

impl EvalError {
    /// Create an error without location.
    pub fn new(kind: EvalErrorKind) -> Self {
        Self {
            kind,
            location: None,
            source_line: None,
        }
    }

    /// Attach a location and the text of the line it points into.
    pub fn at(mut self, location: Location, source_line: Option<String>) -> Self {
        self.location = Some(location);
        self.source_line = source_line;
        self
    }

    /// The error category and message.
    pub fn kind(&self) -> &EvalErrorKind {
        &self.kind
    }

    /// Where the error occurred, if known.
    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// The source line containing the error, if known.
    pub fn source_line(&self) -> Option<&str> {
        self.source_line.as_deref()
    }

    /// The resolver error behind this failure, if any.
    pub fn resolve_error(&self) -> Option<&ResolveError> {
        match &self.kind {
            EvalErrorKind::Import(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{loc}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result alias for engine operations.
pub type EvalResult<T> = Result<T, EvalError>;
