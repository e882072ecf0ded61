use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Name of the optional per-project configuration file.
pub const CONFIG_FILE: &str = "pack-reload.toml";

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Configuration loaded from `pack-reload.toml` at the project root.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReloadConfig {
    /// Additional path patterns to hide from the watcher (beyond .gitignore and built-ins).
    pub ignore: Option<Vec<String>>,
    /// Settling window for the batch scheduler, in milliseconds.
    pub debounce_ms: Option<u64>,
    /// Upper bound for a single renderer call on the full-reload path.
    pub render_timeout_ms: Option<u64>,
    /// Number of reload records kept in history.
    pub history_limit: Option<usize>,
    /// Render once at session start to seed the preview.
    pub initial_render: Option<bool>,
}

impl ReloadConfig {
    /// Load configuration from `pack-reload.toml` in the given root directory.
    ///
    /// Returns a default (empty) configuration if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        path = %config_path.display(),
                        error = %err,
                        "failed to parse config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(err) => {
                warn!(
                    path = %config_path.display(),
                    error = %err,
                    "failed to read config, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> crate::Result<Self> {
        Ok(toml::from_str::<Self>(contents)?)
    }
}

/// Options for a single watch session.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Ignore patterns: `prefix*` / `*suffix` globs, full globs, or plain substrings.
    pub ignore_patterns: Vec<String>,
    pub debounce: Duration,
    pub render_timeout: Duration,
    pub history_limit: usize,
    pub initial_render: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            render_timeout: Duration::from_millis(DEFAULT_RENDER_TIMEOUT_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            initial_render: true,
        }
    }
}

impl WatchOptions {
    /// Build options from a loaded config file, falling back to defaults per key.
    pub fn from_config(config: &ReloadConfig) -> Self {
        let defaults = Self::default();
        Self {
            ignore_patterns: config.ignore.clone().unwrap_or_default(),
            debounce: config
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            render_timeout: config
                .render_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.render_timeout),
            history_limit: config.history_limit.unwrap_or(defaults.history_limit),
            initial_render: config.initial_render.unwrap_or(defaults.initial_render),
        }
    }

    pub fn with_ignore_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_initial_render(mut self, enabled: bool) -> Self {
        self.initial_render = enabled;
        self
    }
}
