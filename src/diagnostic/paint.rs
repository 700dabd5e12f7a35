//! ANSI coloring shared by diagnostics and report rendering.

/// What a piece of text means, which decides its color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tone {
    Error,
    Warning,
    Success,
    Accent,
    Help,
}

/// Colors text when enabled, otherwise passes it through.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Paint {
    enabled: bool,
}

impl Paint {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) fn apply(self, text: &str, tone: Tone) -> String {
        if self.enabled {
            colorize(text, tone)
        } else {
            text.to_owned()
        }
    }
}

#[cfg(feature = "colored-diagnostics")]
fn colorize(text: &str, tone: Tone) -> String {
    use owo_colors::OwoColorize;
    match tone {
        Tone::Error => text.red().to_string(),
        Tone::Warning => text.yellow().to_string(),
        Tone::Success => text.green().to_string(),
        Tone::Accent => text.blue().to_string(),
        Tone::Help => text.cyan().to_string(),
    }
}

#[cfg(not(feature = "colored-diagnostics"))]
fn colorize(text: &str, _tone: Tone) -> String {
    text.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_identity() {
        assert_eq!(Paint::new(false).apply("x", Tone::Error), "x");
    }
}
