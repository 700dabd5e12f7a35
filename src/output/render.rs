//! Renderers for each [`OutputFormat`](super::OutputFormat).

use std::fmt::Write;

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use super::{CheckMessage, CheckResult, Summary};
use crate::diagnostic::paint::{Paint, Tone};

/// How a message counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Warning,
    Failure,
    Exception,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Failure => "failure",
            Self::Exception => "exception",
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Warning => "WARN",
            Self::Failure => "FAIL",
            Self::Exception => "EXCP",
        }
    }

    fn tone(self) -> Tone {
        match self {
            Self::Warning | Self::Exception => Tone::Warning,
            Self::Failure => Tone::Error,
        }
    }
}

/// Non-success messages of one result, failures first.
fn messages(result: &CheckResult) -> impl Iterator<Item = (Outcome, &CheckMessage)> {
    result
        .failures
        .iter()
        .map(|m| (Outcome::Failure, m))
        .chain(result.warnings.iter().map(|m| (Outcome::Warning, m)))
        .chain(result.exceptions.iter().map(|m| (Outcome::Exception, m)))
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

// =============================================================================
// Standard
// =============================================================================

pub(super) fn standard(results: &[CheckResult], paint: Paint) -> String {
    let mut out = String::new();
    for result in results {
        for (outcome, message) in messages(result) {
            _ = writeln!(
                out,
                "{} - {} - {} - {}",
                paint.apply(outcome.tag(), outcome.tone()),
                result.filename,
                result.namespace,
                message.msg
            );
        }
    }

    let summary = Summary::of(results);
    if !out.is_empty() {
        out.push('\n');
    }
    let counts = format!(
        "{}, {} passed, {}, {}, {}",
        plural(summary.tests(), "test"),
        summary.successes,
        plural(summary.warnings, "warning"),
        plural(summary.failures, "failure"),
        plural(summary.exceptions, "exception"),
    );
    let tone = if summary.failures > 0 {
        Tone::Error
    } else if summary.warnings + summary.exceptions > 0 {
        Tone::Warning
    } else {
        Tone::Success
    };
    _ = writeln!(out, "{}", paint.apply(&counts, tone));
    out
}

// =============================================================================
// JSON
// =============================================================================

pub(super) fn json(results: &[CheckResult]) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"\t"));
    results.serialize(&mut serializer)?;
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    text.push('\n');
    Ok(text)
}

// =============================================================================
// Table
// =============================================================================

const TABLE_HEADER: [&str; 4] = ["RESULT", "FILE", "NAMESPACE", "MESSAGE"];

pub(super) fn table(results: &[CheckResult]) -> String {
    let mut rows: Vec<[String; 4]> = Vec::new();
    for result in results {
        for _ in 0..result.successes {
            rows.push([
                "success".into(),
                result.filename.clone(),
                result.namespace.clone(),
                "SUCCESS".into(),
            ]);
        }
        for (outcome, message) in messages(result) {
            rows.push([
                outcome.label().into(),
                result.filename.clone(),
                result.namespace.clone(),
                message.msg.clone(),
            ]);
        }
    }

    let mut widths = TABLE_HEADER.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .chain(std::iter::once("+".to_owned()))
        .collect();

    let mut out = String::new();
    let write_row = |out: &mut String, cells: &[&str]| {
        for (cell, width) in cells.iter().zip(widths) {
            let pad = width - cell.chars().count();
            _ = write!(out, "| {cell}{} ", " ".repeat(pad));
        }
        out.push_str("|\n");
    };

    _ = writeln!(out, "{rule}");
    write_row(&mut out, &TABLE_HEADER);
    _ = writeln!(out, "{rule}");
    for row in &rows {
        let cells = row.each_ref().map(String::as_str);
        write_row(&mut out, &cells);
    }
    _ = writeln!(out, "{rule}");
    out
}

// =============================================================================
// TAP
// =============================================================================

pub(super) fn tap(results: &[CheckResult]) -> String {
    let mut out = String::new();
    _ = writeln!(out, "1..{}", Summary::of(results).tests());

    let mut index = 0;
    let mut line = |out: &mut String, ok: bool, result: &CheckResult, msg: Option<&str>| {
        index += 1;
        let status = if ok { "ok" } else { "not ok" };
        _ = write!(out, "{status} {index} - {} - {}", result.filename, result.namespace);
        if let Some(msg) = msg {
            _ = write!(out, " - {msg}");
        }
        out.push('\n');
    };

    for result in results {
        for failure in &result.failures {
            line(&mut out, false, result, Some(&failure.msg));
        }
        if !result.warnings.is_empty() {
            out.push_str("# warnings\n");
            for warning in &result.warnings {
                line(&mut out, false, result, Some(&warning.msg));
            }
        }
        if !result.exceptions.is_empty() {
            out.push_str("# exceptions\n");
            for exception in &result.exceptions {
                line(&mut out, false, result, Some(&exception.msg));
            }
        }
        if result.successes > 0 {
            out.push_str("# successes\n");
            for _ in 0..result.successes {
                line(&mut out, true, result, None);
            }
        }
    }
    out
}

// =============================================================================
// JUnit
// =============================================================================

pub(super) fn junit(results: &[CheckResult]) -> String {
    let summary = Summary::of(results);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<testsuites>\n");
    _ = writeln!(
        out,
        "\t<testsuite name=\"conftest\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\">",
        summary.tests(),
        summary.failures + summary.warnings,
        summary.exceptions
    );

    for result in results {
        let classname = escape(&format!("conftest.{}", result.namespace));
        let file = escape(&result.filename);

        for _ in 0..result.successes {
            _ = writeln!(out, "\t\t<testcase classname=\"{classname}\" name=\"{file}\"></testcase>");
        }
        for (outcome, message) in messages(result) {
            let msg = escape(&message.msg);
            _ = writeln!(
                out,
                "\t\t<testcase classname=\"{classname}\" name=\"{file} - {msg}\">"
            );
            match outcome {
                Outcome::Exception => {
                    _ = writeln!(out, "\t\t\t<skipped message=\"{msg}\"></skipped>");
                }
                Outcome::Warning | Outcome::Failure => {
                    _ = writeln!(
                        out,
                        "\t\t\t<failure message=\"{msg}\" type=\"{}\">{msg}</failure>",
                        outcome.label()
                    );
                }
            }
            out.push_str("\t\t</testcase>\n");
        }
    }

    out.push_str("\t</testsuite>\n");
    out.push_str("</testsuites>\n");
    out
}

/// Escape text for XML attributes and content.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample;
    use super::*;

    #[test]
    fn test_standard() {
        assert_eq!(
            standard(&sample(), Paint::new(false)),
            "FAIL - test.yaml - main - Error: test failure\n\
             WARN - test.yaml - main - Warning: test warning\n\
             \n\
             3 tests, 1 passed, 1 warning, 1 failure, 0 exceptions\n"
        );
    }

    #[test]
    fn test_standard_all_passed() {
        let results = vec![CheckResult {
            filename: "ok.yaml".into(),
            namespace: "main".into(),
            successes: 1,
            ..CheckResult::default()
        }];
        assert_eq!(
            standard(&results, Paint::new(false)),
            "1 test, 1 passed, 0 warnings, 0 failures, 0 exceptions\n"
        );
    }

    #[test]
    fn test_json_round_trips() {
        let text = json(&sample()).unwrap();
        assert!(text.starts_with("[\n\t{\n\t\t\"filename\": \"test.yaml\""));
        let back: Vec<CheckResult> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_table() {
        let text = table(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], lines[2]);
        assert_eq!(lines[1], "| RESULT  | FILE      | NAMESPACE | MESSAGE               |");
        assert_eq!(lines[3], "| success | test.yaml | main      | SUCCESS               |");
        assert_eq!(lines[4], "| failure | test.yaml | main      | Error: test failure   |");
        assert_eq!(lines[5], "| warning | test.yaml | main      | Warning: test warning |");
    }

    #[test]
    fn test_tap() {
        assert_eq!(
            tap(&sample()),
            "1..3\n\
             not ok 1 - test.yaml - main - Error: test failure\n\
             # warnings\n\
             not ok 2 - test.yaml - main - Warning: test warning\n\
             # successes\n\
             ok 3 - test.yaml - main\n"
        );
    }

    #[test]
    fn test_junit_escapes() {
        let mut results = sample();
        results[0].failures[0].msg = "a < b & \"c\"".into();
        let xml = junit(&results);
        assert!(xml.contains("tests=\"3\" failures=\"2\" errors=\"0\" skipped=\"0\""));
        assert!(xml.contains("<failure message=\"a &lt; b &amp; &quot;c&quot;\" type=\"failure\">"));
        assert!(xml.ends_with("</testsuites>\n"));
    }
}
