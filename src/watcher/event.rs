use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

/// What happened to a path, as far as the watcher could tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RawKind {
    Modified,
    Added,
    Removed,
    /// The OS event queue overflowed and changes may have been lost. Carries an empty
    /// path; every tracked file has to be re-checked.
    Rescan,
}

/// A single filesystem observation, consumed within one debounce window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeEvent {
    /// Root-relative path.
    pub path: PathBuf,
    pub kind: RawKind,
    pub observed_at: Instant,
}

impl RawChangeEvent {
    /// Marker for a lost-events notification from the OS watcher.
    pub fn rescan() -> Self {
        Self::new(PathBuf::new(), RawKind::Rescan)
    }

    pub fn new(path: impl Into<PathBuf>, kind: RawKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at: Instant::now(),
        }
    }

    pub fn at(path: impl Into<PathBuf>, kind: RawKind, observed_at: Instant) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at,
        }
    }
}
