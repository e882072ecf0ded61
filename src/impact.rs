use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::classify::{ChangeClassification, ChangeKind, classify};
use crate::graph::DependencyGraph;
use crate::scheduler::ChangeBatch;
use crate::watcher::event::RawKind;

/// How a batch is applied to the live preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadStrategy {
    Hot,
    Full,
}

impl fmt::Display for ReloadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadStrategy::Hot => f.write_str("hot"),
            ReloadStrategy::Full => f.write_str("full"),
        }
    }
}

/// Why a plan could not be applied hot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FullReason {
    /// A configuration, layout or unknown file changed.
    Kind(ChangeKind),
    /// Dependency edges may be stale after an addition.
    FileAdded(PathBuf),
    /// Dependency edges may be stale after a removal.
    FileRemoved(PathBuf),
    /// The hot fragment for a file could not be produced.
    HotFragmentUnavailable(PathBuf),
}

impl fmt::Display for FullReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FullReason::Kind(kind) => write!(f, "{kind} change"),
            FullReason::FileAdded(p) => write!(f, "added {}", p.display()),
            FullReason::FileRemoved(p) => write!(f, "removed {}", p.display()),
            FullReason::HotFragmentUnavailable(p) => {
                write!(f, "no hot fragment for {}", p.display())
            }
        }
    }
}

/// The decided outcome for one batch. Immutable once computed, apart from escalation
/// to a full reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadPlan {
    /// Paths in the batch, sorted.
    pub affected_files: Vec<PathBuf>,
    /// Direct (one-hop) dependents of the affected files, sorted, excluding affected files.
    pub dependent_files: Vec<PathBuf>,
    pub change_kinds: BTreeSet<ChangeKind>,
    pub classifications: Vec<ChangeClassification>,
    /// Removed paths, for the applier and renderer.
    pub removed_files: Vec<PathBuf>,
    pub strategy: ReloadStrategy,
    /// Empty exactly when `strategy` is hot.
    pub full_reasons: Vec<FullReason>,
}

impl ReloadPlan {
    pub fn is_hot(&self) -> bool {
        self.strategy == ReloadStrategy::Hot
    }

    /// Force the plan to a full reload.
    pub fn escalate(&mut self, reason: FullReason) {
        self.strategy = ReloadStrategy::Full;
        if !self.full_reasons.contains(&reason) {
            self.full_reasons.push(reason);
        }
    }
}

/// Decide how to apply a batch.
///
/// 1. Classify each path.
/// 2. Collect direct dependents from the graph (one hop, no transitive closure).
/// 3. Hot only if every kind is styles, assets or content.
/// 4. Any added or removed file forces full.
///
/// Returns `None` for an empty batch. The graph must still reflect the state before any
/// removal in the batch, so dependents of removed files are found.
pub fn analyze(batch: &ChangeBatch, graph: &DependencyGraph) -> Option<ReloadPlan> {
    if batch.is_empty() {
        return None;
    }

    let mut affected_files = Vec::with_capacity(batch.len());
    let mut classifications = Vec::with_capacity(batch.len());
    let mut change_kinds = BTreeSet::new();
    let mut dependents = BTreeSet::new();
    let mut removed_files = Vec::new();
    let mut full_reasons = BTreeSet::new();

    for event in batch.events() {
        let classification = classify(&event.path);
        change_kinds.insert(classification.kind);
        if !classification.hot_reloadable {
            full_reasons.insert(FullReason::Kind(classification.kind));
        }

        match event.kind {
            RawKind::Added => {
                full_reasons.insert(FullReason::FileAdded(event.path.clone()));
            }
            RawKind::Removed => {
                full_reasons.insert(FullReason::FileRemoved(event.path.clone()));
                removed_files.push(event.path.clone());
            }
            RawKind::Modified | RawKind::Rescan => {}
        }

        dependents.extend(graph.lookup(&event.path));
        affected_files.push(event.path.clone());
        classifications.push(classification);
    }

    let dependent_files: Vec<PathBuf> = dependents
        .into_iter()
        .filter(|p| batch.get(p).is_none())
        .collect();

    let strategy = if full_reasons.is_empty() {
        ReloadStrategy::Hot
    } else {
        ReloadStrategy::Full
    };

    Some(ReloadPlan {
        affected_files,
        dependent_files,
        change_kinds,
        classifications,
        removed_files,
        strategy,
        full_reasons: full_reasons.into_iter().collect(),
    })
}
