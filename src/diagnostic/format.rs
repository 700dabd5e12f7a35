//! Diagnostic formatting utilities.

use std::fmt::Write;

use super::paint::{Paint, Tone};
use crate::engine::EvalError;

// ============================================================================
// Options
// ============================================================================

/// Display style for diagnostic output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayStyle {
    /// Rich output with the offending source line and a marker.
    #[default]
    Rich,
    /// Short output with just file:line:col and message.
    Short,
}

/// Options for controlling diagnostic formatting.
///
/// # Example
///
/// ```
/// use jsonnet_sandbox::diagnostic::{DiagnosticOptions, DisplayStyle};
///
/// // Plain text (no ANSI colors) for logging
/// let opts = DiagnosticOptions::plain();
///
/// // Short format for CI/IDE integration
/// let opts = DiagnosticOptions::short();
///
/// let opts = DiagnosticOptions::plain()
///     .with_style(DisplayStyle::Rich)
///     .with_snippets(true);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticOptions {
    /// Whether to use ANSI colors in output.
    pub colored: bool,
    /// Display style (rich with snippets or short).
    pub style: DisplayStyle,
    /// Whether to include the source line.
    pub snippets: bool,
    /// Whether to list the error's causes.
    pub causes: bool,
}

impl Default for DiagnosticOptions {
    /// Color follows [`config::get`](crate::config::get).
    fn default() -> Self {
        Self {
            colored: crate::config::get().colored_diagnostics,
            style: DisplayStyle::Rich,
            snippets: true,
            causes: true,
        }
    }
}

impl DiagnosticOptions {
    /// Create options for colored terminal output.
    pub fn colored() -> Self {
        Self {
            colored: true,
            ..Self::default()
        }
    }

    /// Create options for plain text output (no ANSI colors).
    pub fn plain() -> Self {
        Self {
            colored: false,
            ..Self::default()
        }
    }

    /// Create options for short format (file:line:col: message).
    pub fn short() -> Self {
        Self {
            style: DisplayStyle::Short,
            snippets: false,
            causes: false,
            ..Self::default()
        }
    }

    /// Set whether to use colors.
    pub fn with_colored(mut self, colored: bool) -> Self {
        self.colored = colored;
        self
    }

    /// Set display style.
    pub fn with_style(mut self, style: DisplayStyle) -> Self {
        self.style = style;
        self
    }

    /// Set whether to include the source line.
    pub fn with_snippets(mut self, snippets: bool) -> Self {
        self.snippets = snippets;
        self
    }

    /// Set whether to list causes.
    pub fn with_causes(mut self, causes: bool) -> Self {
        self.causes = causes;
        self
    }
}

// ============================================================================
// Gutter Characters
// ============================================================================

mod gutter {
    pub const HEADER: &str = "┌─";
    pub const BAR: &str = "│";
    pub const MARKER: &str = "^";
}

// ============================================================================
// Snippet Writer
// ============================================================================

/// Writes `┌─ path:line:col`, the source line and a marker under the column.
struct SnippetWriter<'a> {
    output: &'a mut String,
    paint: Paint,
    line_num_width: usize,
}

impl<'a> SnippetWriter<'a> {
    fn new(output: &'a mut String, paint: Paint, line: usize) -> Self {
        Self {
            output,
            paint,
            line_num_width: line.to_string().len(),
        }
    }

    fn write_header(&mut self, location: &str) {
        _ = writeln!(
            self.output,
            "{:>width$} {} {}",
            "",
            self.paint.apply(gutter::HEADER, Tone::Accent),
            location,
            width = self.line_num_width
        );
    }

    fn write_empty_gutter(&mut self) {
        _ = writeln!(
            self.output,
            "{:>width$} {}",
            "",
            self.paint.apply(gutter::BAR, Tone::Accent),
            width = self.line_num_width
        );
    }

    fn write_source_line(&mut self, line_num: usize, text: &str) {
        let line_num = format!("{line_num:>width$}", width = self.line_num_width);
        _ = writeln!(
            self.output,
            "{} {} {}",
            self.paint.apply(&line_num, Tone::Accent),
            self.paint.apply(gutter::BAR, Tone::Accent),
            text
        );
    }

    /// `column` is 1-based.
    fn write_marker(&mut self, column: usize) {
        _ = writeln!(
            self.output,
            "{:>width$} {} {}{}",
            "",
            self.paint.apply(gutter::BAR, Tone::Accent),
            " ".repeat(column.saturating_sub(1)),
            self.paint.apply(gutter::MARKER, Tone::Error),
            width = self.line_num_width
        );
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Format an evaluation error for display.
///
/// ```
/// use jsonnet_sandbox::diagnostic::{format_error, DiagnosticOptions};
/// use jsonnet_sandbox::engine::{EvalError, EvalErrorKind, Location};
///
/// let err = EvalError::new(EvalErrorKind::Runtime("boom".into())).at(
///     Location { file: "a.jsonnet".into(), line: 1, column: 5 },
///     Some("{ a: error 'boom' }".into()),
/// );
/// assert_eq!(
///     format_error(&err, &DiagnosticOptions::short().with_colored(false)),
///     "a.jsonnet:1:5: error: boom\n",
/// );
/// ```
pub fn format_error(error: &EvalError, options: &DiagnosticOptions) -> String {
    let paint = Paint::new(options.colored);
    let mut output = String::new();

    match options.style {
        DisplayStyle::Short => format_short(&mut output, error, paint),
        DisplayStyle::Rich => format_rich(&mut output, error, paint, options),
    }
    output
}

fn format_short(output: &mut String, error: &EvalError, paint: Paint) {
    let label = paint.apply("error", Tone::Error);
    if let Some(loc) = error.location() {
        _ = write!(output, "{loc}: ");
    }
    _ = writeln!(output, "{label}: {}", error.kind());
}

fn format_rich(output: &mut String, error: &EvalError, paint: Paint, options: &DiagnosticOptions) {
    // Header: "error: message"
    _ = writeln!(output, "{}: {}", paint.apply("error", Tone::Error), error.kind());

    if let Some(loc) = error.location() {
        let mut writer = SnippetWriter::new(output, paint, loc.line);
        writer.write_header(&loc.to_string());
        if options.snippets
            && let Some(line) = error.source_line()
        {
            writer.write_empty_gutter();
            writer.write_source_line(loc.line, line);
            writer.write_marker(loc.column);
        }
    }

    if options.causes {
        let mut cause = std::error::Error::source(error.kind());
        while let Some(err) = cause {
            _ = writeln!(output, "  {} caused by: {err}", paint.apply("=", Tone::Help));
            cause = err.source();
        }
    }
}
