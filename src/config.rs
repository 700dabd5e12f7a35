//! Process-wide configuration.
//!
//! Use [`ConfigBuilder`] at application startup to set default library paths
//! and diagnostic coloring, or [`init_default`] to take library paths from
//! `JSONNET_PATH`. Without either, [`get`] returns [`Config::default`], so the
//! environment never widens the sandbox unless the application opts in.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable holding extra library paths, separated like `PATH`.
pub const JSONNET_PATH: &str = "JSONNET_PATH";

/// Global configuration, initialized via [`ConfigBuilder::init`].
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Library paths appended after the working directory by every
    /// [`Parser`](crate::Parser), lowest priority first.
    pub library_paths: Vec<PathBuf>,
    /// Whether [`DiagnosticOptions::default`](crate::diagnostic::DiagnosticOptions)
    /// uses ANSI colors.
    pub colored_diagnostics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_paths: Vec::new(),
            colored_diagnostics: cfg!(feature = "colored-diagnostics"),
        }
    }
}

impl Config {
    /// Defaults plus library paths from `JSONNET_PATH`.
    ///
    /// Like the `jsonnet` tool, the leftmost entry wins, so the list is
    /// reversed into lowest-priority-first order.
    pub fn from_env() -> Self {
        let mut library_paths: Vec<PathBuf> = env::var_os(JSONNET_PATH)
            .map(|value| {
                env::split_paths(&value)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        library_paths.reverse();

        if !library_paths.is_empty() {
            tracing::debug!(?library_paths, "library paths from {JSONNET_PATH}");
        }

        Self {
            library_paths,
            ..Self::default()
        }
    }
}

/// Configuration builder for fluent API.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    library_paths: Vec<PathBuf>,
    colored_diagnostics: Option<bool>,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a library path. Later paths take priority.
    ///
    /// # Example
    ///
    /// ```
    /// use jsonnet_sandbox::config::ConfigBuilder;
    ///
    /// ConfigBuilder::new()
    ///     .library_path("/usr/share/jsonnet")
    ///     .colored_diagnostics(false)
    ///     .init();
    /// ```
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

    /// Set whether diagnostics are colored by default.
    pub fn colored_diagnostics(mut self, colored: bool) -> Self {
        self.colored_diagnostics = Some(colored);
        self
    }

    fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            library_paths: self.library_paths,
            colored_diagnostics: self
                .colored_diagnostics
                .unwrap_or(defaults.colored_diagnostics),
        }
    }

    /// Build and initialize the global configuration.
    ///
    /// This can only be called once. Subsequent calls are ignored.
    /// Returns `true` if configuration was set, `false` if already initialized.
    pub fn init(self) -> bool {
        CONFIG.set(self.build()).is_ok()
    }
}

/// Initialize with configuration read from the environment.
///
/// Returns `false` if configuration was already set.
pub fn init_default() -> bool {
    CONFIG.set(Config::from_env()).is_ok()
}

/// Get the current configuration, or the defaults if not initialized.
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.library_paths.is_empty());
        assert_eq!(config.colored_diagnostics, cfg!(feature = "colored-diagnostics"));
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .library_path("/one")
            .library_paths(["/two", "/three"])
            .colored_diagnostics(false)
            .build();
        assert_eq!(
            config.library_paths,
            vec![
                PathBuf::from("/one"),
                PathBuf::from("/two"),
                PathBuf::from("/three")
            ]
        );
        assert!(!config.colored_diagnostics);
    }

    #[test]
    fn test_builder_keeps_default_color() {
        let config = ConfigBuilder::new().build();
        assert_eq!(config.colored_diagnostics, Config::default().colored_diagnostics);
    }
}
