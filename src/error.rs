use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the reload engine.
///
/// Only [`Error::RootUnreadable`], [`Error::Watch`] and [`Error::Pattern`] are fatal (they
/// abort `WatchSession::start`). Render errors are reported through reload-failed
/// notifications and never stop a running session.
#[derive(Error, Debug)]
pub enum Error {
    #[error("project root {} is not readable: {source}", path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("render failed: {0}")]
    Render(String),

    #[error("render timed out after {}ms", .0.as_millis())]
    RenderTimeout(Duration),
}

/// Result alias for reload engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unreadable_message_names_path() {
        let err = Error::RootUnreadable {
            path: PathBuf::from("/nope"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope"), "message should name the root: {msg}");
        assert!(msg.contains("missing"));
    }

    #[test]
    fn test_render_timeout_message_in_millis() {
        let err = Error::RenderTimeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "render timed out after 1500ms");
    }
}
