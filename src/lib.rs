//! Incremental preview regeneration for document projects.
//!
//! A [`WatchSession`] watches a project root, coalesces file-system events into batches,
//! decides per batch whether the live preview can be patched in place (hot) or must be
//! re-rendered (full), and reports every cycle to subscribers and to a bounded history.

pub mod applier;
pub mod checksum;
pub mod classify;
pub mod config;
pub mod error;
pub mod graph;
pub mod impact;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod update;
pub mod walker;
pub mod watcher;

pub use applier::{
    OverflowPolicy, PreviewState, ReloadCompleted, ReloadFailed, ReloadNotification, Subscription,
};
pub use classify::{ChangeClassification, ChangeKind, classify};
pub use config::{ReloadConfig, WatchOptions};
pub use error::{Error, Result};
pub use impact::{FullReason, ReloadPlan, ReloadStrategy};
pub use session::WatchSession;
pub use stats::{ReloadRecord, ReloadStats};
pub use update::{Manifest, ManifestRenderer, RenderOutput, RenderRequest, Renderer};
