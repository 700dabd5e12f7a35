//! Policy check reports and the `reformat` command.
//!
//! Check results arrive as JSON (the `json` output of a policy run) and are
//! rendered again in another format:
//!
//! ```
//! use jsonnet_sandbox::output::Reformat;
//!
//! let input = br#"[{"filename": "a.yaml", "namespace": "main", "successes": 1,
//!                  "failures": [{"msg": "bad"}]}]"#;
//! let mut out = Vec::new();
//! Reformat::new("tap").run(&input[..], &mut out).unwrap();
//! assert!(String::from_utf8(out).unwrap().starts_with("1..2\n"));
//! ```

mod render;

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Map;
use thiserror::Error;

use crate::diagnostic::paint::Paint;

// =============================================================================
// Results
// =============================================================================

/// One policy message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckMessage {
    pub msg: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, serde_json::Value>,
}

impl CheckMessage {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            metadata: Map::new(),
        }
    }
}

/// Results of checking one file in one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub filename: String,
    pub namespace: String,
    #[serde(default)]
    pub successes: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CheckMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CheckMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<CheckMessage>,
}

/// Totals across a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub successes: usize,
    pub warnings: usize,
    pub failures: usize,
    pub exceptions: usize,
}

impl Summary {
    pub fn of(results: &[CheckResult]) -> Self {
        results.iter().fold(Self::default(), |acc, r| Self {
            successes: acc.successes + r.successes,
            warnings: acc.warnings + r.warnings.len(),
            failures: acc.failures + r.failures.len(),
            exceptions: acc.exceptions + r.exceptions.len(),
        })
    }

    pub fn tests(&self) -> usize {
        self.successes + self.warnings + self.failures + self.exceptions
    }
}

// =============================================================================
// Format
// =============================================================================

/// Report format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Standard,
    Json,
    Table,
    Tap,
    Junit,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        Self::Standard,
        Self::Json,
        Self::Table,
        Self::Tap,
        Self::Junit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Json => "json",
            Self::Table => "table",
            Self::Tap => "tap",
            Self::Junit => "junit",
        }
    }

    /// Render `results` in this format.
    pub fn render(self, results: &[CheckResult], colored: bool) -> Result<String, ReformatError> {
        let paint = Paint::new(colored);
        Ok(match self {
            Self::Standard => render::standard(results, paint),
            Self::Json => render::json(results).map_err(ReformatError::Encode)?,
            Self::Table => render::table(results),
            Self::Tap => render::tap(results),
            Self::Junit => render::junit(results),
        })
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = ReformatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ReformatError::UnknownFormat {
                format: s.to_owned(),
            })
    }
}

// =============================================================================
// Reformat
// =============================================================================

#[derive(Debug, Error)]
pub enum ReformatError {
    #[error("unknown output format {format:?}, expected one of: standard, json, table, tap, junit")]
    UnknownFormat { format: String },

    #[error("read {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read stdin: {0}")]
    Stdin(#[source] io::Error),

    #[error("decode check results: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("encode check results: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("write output: {0}")]
    Write(#[source] io::Error),
}

/// Re-render check results read from a file or stdin.
#[derive(Debug, Clone)]
pub struct Reformat {
    /// Format name, validated by [`Reformat::format`].
    pub output: String,
    /// Read results from this file instead of stdin.
    pub input: Option<PathBuf>,
    pub colored: bool,
}

impl Default for Reformat {
    fn default() -> Self {
        Self {
            output: OutputFormat::default().name().to_owned(),
            input: None,
            colored: false,
        }
    }
}

impl Reformat {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    pub fn with_colored(mut self, colored: bool) -> Self {
        self.colored = colored;
        self
    }

    /// Validate the requested format before doing any I/O.
    pub fn format(&self) -> Result<OutputFormat, ReformatError> {
        self.output.parse()
    }

    pub fn run<R: Read, W: Write>(&self, stdin: R, mut stdout: W) -> Result<(), ReformatError> {
        let format = self.format()?;
        let results = self.read_results(stdin)?;
        tracing::debug!(%format, results = results.len(), "reformatting check results");

        let rendered = format.render(&results, self.colored)?;
        stdout
            .write_all(rendered.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(ReformatError::Write)
    }

    fn read_results<R: Read>(&self, mut stdin: R) -> Result<Vec<CheckResult>, ReformatError> {
        let data = match &self.input {
            Some(path) => fs::read(path).map_err(|source| ReformatError::Input {
                path: path.clone(),
                source,
            })?,
            None => {
                let mut data = Vec::new();
                stdin.read_to_end(&mut data).map_err(ReformatError::Stdin)?;
                data
            }
        };
        serde_json::from_slice(&data).map_err(ReformatError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn sample() -> Vec<CheckResult> {
        vec![CheckResult {
            filename: "test.yaml".into(),
            namespace: "main".into(),
            successes: 1,
            warnings: vec![CheckMessage::new("Warning: test warning")],
            failures: vec![CheckMessage::new("Error: test failure")],
            exceptions: vec![],
        }]
    }

    fn reformat(output: &str) -> Result<String, ReformatError> {
        let input = serde_json::to_vec(&sample()).unwrap();
        let mut out = Vec::new();
        Reformat::new(output).run(&input[..], &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_every_format_renders() {
        for format in OutputFormat::ALL {
            let text = reformat(format.name()).unwrap();
            assert!(text.contains("test.yaml"), "{format}: {text}");
        }
    }

    #[test]
    fn test_invalid_format() {
        let err = reformat("invalid").unwrap_err();
        assert!(matches!(err, ReformatError::UnknownFormat { ref format } if format == "invalid"));
    }

    #[test]
    fn test_default_is_standard() {
        assert_eq!(Reformat::default().format().unwrap(), OutputFormat::Standard);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
    }

    #[test]
    fn test_json_field_names() {
        let value = serde_json::to_value(&sample()[0]).unwrap();
        assert_eq!(value["filename"], "test.yaml");
        assert_eq!(value["failures"][0]["msg"], "Error: test failure");
        assert!(value.get("exceptions").is_none());
        assert!(value["warnings"][0].get("metadata").is_none());
    }

    #[test]
    fn test_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        fs::write(&path, serde_json::to_vec(&sample()).unwrap()).unwrap();

        let mut out = Vec::new();
        Reformat::new("standard")
            .with_input(&path)
            .run(io::empty(), &mut out)
            .unwrap();
        assert!(String::from_utf8(out).unwrap().contains("FAIL - test.yaml - main - Error: test failure"));
    }

    #[test]
    fn test_missing_input_file() {
        let err = Reformat::new("json")
            .with_input("/definitely/not/here.json")
            .run(io::empty(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ReformatError::Input { .. }));
    }

    #[test]
    fn test_bad_json() {
        let mut out = Vec::new();
        let err = Reformat::new("json").run(&b"{"[..], &mut out).unwrap_err();
        assert!(matches!(err, ReformatError::Decode(_)));
    }
}
