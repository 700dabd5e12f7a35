//! Diagnostic formatting for evaluation errors.

mod format;
pub(crate) mod paint;

pub use format::{format_error, DiagnosticOptions, DisplayStyle};
