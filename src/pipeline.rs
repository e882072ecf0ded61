//! One reload cycle: normalise a batch, analyse it, build updates, apply them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::applier::ReloadApplier;
use crate::checksum::{ChecksumStore, Fingerprint};
use crate::graph::DependencyGraph;
use crate::impact::{FullReason, ReloadPlan, analyze};
use crate::scheduler::ChangeBatch;
use crate::stats::ReloadRecord;
use crate::update::{Manifest, RenderRequest, Renderer, full_update, hot_updates};
use crate::walker::ScannedFile;
use crate::watcher::event::{RawChangeEvent, RawKind};

/// Owns the checksum store and drives batches through analysis, generation and applying.
///
/// Runs are strictly sequential: `process` takes `&mut self`, so a second batch can never
/// start while one is in flight.
pub struct ReloadPipeline {
    root: PathBuf,
    store: ChecksumStore,
    graph: Arc<RwLock<DependencyGraph>>,
    renderer: Arc<dyn Renderer>,
    render_timeout: Duration,
    applier: Arc<ReloadApplier>,
}

/// A normalised batch plus the text needed to rescan changed files.
struct Normalised {
    batch: ChangeBatch,
    texts: Vec<(PathBuf, Option<String>)>,
}

impl ReloadPipeline {
    /// Build the pipeline from a baseline snapshot of `root`.
    pub fn new(
        root: &Path,
        baseline: &[ScannedFile],
        renderer: Arc<dyn Renderer>,
        render_timeout: Duration,
        applier: Arc<ReloadApplier>,
    ) -> Self {
        let mut store = ChecksumStore::new();
        for file in baseline {
            store.insert(file.path.clone(), file.checksum);
        }
        let graph = DependencyGraph::build(baseline);

        Self {
            root: root.to_path_buf(),
            store,
            graph: Arc::new(RwLock::new(graph)),
            renderer,
            render_timeout,
            applier,
        }
    }

    /// Shared handle to the dependency graph, for read-only queries.
    pub fn graph(&self) -> Arc<RwLock<DependencyGraph>> {
        Arc::clone(&self.graph)
    }

    pub fn applier(&self) -> &Arc<ReloadApplier> {
        &self.applier
    }

    pub fn tracked_files(&self) -> usize {
        self.store.len()
    }

    /// Render once from the baseline to seed the preview. Failure is logged only.
    pub async fn seed(&self) {
        let request = self.render_request(Vec::new());
        match full_update(Arc::clone(&self.renderer), request, self.render_timeout).await {
            Ok(update) => {
                self.applier.seed(update);
                debug!("initial render seeded the preview");
            }
            Err(err) => warn!(error = %err, "initial render failed"),
        }
    }

    /// Run one batch through the pipeline.
    ///
    /// Returns `None` when nothing in the batch survived normalisation (every event was a
    /// metadata-only touch or referred to a file that is not tracked).
    pub async fn process(&mut self, batch: ChangeBatch) -> Option<ReloadRecord> {
        let started = Instant::now();
        let raw_len = batch.len();

        let Normalised { batch, texts } = self.normalise(batch);
        if batch.is_empty() {
            debug!(events = raw_len, "batch had no content changes");
            return None;
        }

        let mut plan = {
            let mut graph = self.graph.write().unwrap_or_else(|e| e.into_inner());
            for (path, text) in &texts {
                match batch.kind_of(path) {
                    Some(RawKind::Added) => graph.on_file_added(path, text.as_deref()),
                    Some(RawKind::Modified) => graph.on_file_changed(path, text.as_deref()),
                    _ => {}
                }
            }
            let plan = analyze(&batch, &graph)?;
            for path in &plan.removed_files {
                graph.on_file_removed(path);
            }
            plan
        };

        info!(
            strategy = %plan.strategy,
            files = plan.affected_files.len(),
            dependents = plan.dependent_files.len(),
            "reload planned"
        );

        if plan.is_hot() {
            match hot_updates(&plan, &self.root, &self.store) {
                Ok(updates) => return Some(self.applier.apply(&plan, updates, started)),
                Err(path) => {
                    debug!(path = %path.display(), "hot fragment unavailable, escalating");
                    plan.escalate(FullReason::HotFragmentUnavailable(path));
                }
            }
        } else {
            debug!(reasons = ?plan.full_reasons, "full reload required");
        }

        Some(self.run_full(&plan, started).await)
    }

    async fn run_full(&self, plan: &ReloadPlan, started: Instant) -> ReloadRecord {
        let request = self.render_request(plan.affected_files.clone());
        match full_update(Arc::clone(&self.renderer), request, self.render_timeout).await {
            Ok(update) => self.applier.apply(plan, vec![update], started),
            Err(err) => self.applier.fail(plan, &err, started),
        }
    }

    fn render_request(&self, affected_files: Vec<PathBuf>) -> RenderRequest {
        RenderRequest {
            manifest: Manifest::from_store(&self.root, &self.store),
            affected_files,
        }
    }

    /// Reconcile raw events with the checksum store.
    ///
    /// - Unchanged content drops the event.
    /// - `added` for a tracked file becomes `modified`; `modified` for an untracked one
    ///   becomes `added`.
    /// - A vanished file becomes `removed`; removal of a directory expands to the tracked
    ///   files beneath it.
    /// - A rescan marker re-checks every tracked file.
    fn normalise(&mut self, batch: ChangeBatch) -> Normalised {
        let mut worklist: BTreeMap<PathBuf, Instant> = BTreeMap::new();
        for event in batch {
            if event.kind == RawKind::Rescan {
                for file in self.store.iter() {
                    worklist.entry(file.path.clone()).or_insert(event.observed_at);
                }
            } else {
                worklist.insert(event.path, event.observed_at);
            }
        }

        let mut out = ChangeBatch::new();
        let mut texts = Vec::new();

        for (path, observed_at) in worklist {
            let on_disk = self.root.join(&path).is_file();

            if !on_disk {
                if self.store.remove(&path).is_some() {
                    out.insert(RawChangeEvent::at(path, RawKind::Removed, observed_at));
                } else {
                    for tracked in self.store.tracked_under(&path) {
                        self.store.remove(&tracked);
                        out.insert(RawChangeEvent::at(tracked, RawKind::Removed, observed_at));
                    }
                }
                continue;
            }

            let Some(scanned) = ScannedFile::read(&self.root, &path) else {
                continue;
            };
            let kind = match self.store.update(&path, Some(scanned.checksum)) {
                Fingerprint::New => RawKind::Added,
                Fingerprint::Changed => RawKind::Modified,
                Fingerprint::Unchanged | Fingerprint::Vanished => continue,
            };
            texts.push((path.clone(), scanned.text));
            out.insert(RawChangeEvent::at(path, kind, observed_at));
        }

        Normalised { batch: out, texts }
    }
}
