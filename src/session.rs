//! A running watch session over one project root.
//!
//! Three stages run concurrently: the OS watcher bridge, the debounce scheduler, and the
//! reload pipeline. They are connected by a bounded raw-event channel and a depth-1
//! [`BatchSlot`], so at most one batch waits behind the run in flight.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::applier::{
    OverflowPolicy, PreviewState, ReloadApplier, ReloadCompleted, ReloadFailed,
    ReloadNotification, Subscription,
};
use crate::config::WatchOptions;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::pipeline::ReloadPipeline;
use crate::scheduler::{BatchScheduler, BatchSlot};
use crate::stats::{ReloadRecord, ReloadStats};
use crate::update::Renderer;
use crate::walker::{IgnoreMatcher, check_root, relative_to, walk_baseline};
use crate::watcher::event::RawChangeEvent;
use crate::watcher::{WatcherHandle, start_watcher};

/// Channel capacity used by the callback helpers.
const CALLBACK_CAPACITY: usize = 64;

pub struct WatchSession {
    root: PathBuf,
    applier: Arc<ReloadApplier>,
    graph: Arc<RwLock<DependencyGraph>>,
    watcher: WatcherHandle,
    shutdown: watch::Sender<bool>,
    scheduler_task: JoinHandle<()>,
    pipeline_task: JoinHandle<()>,
}

impl WatchSession {
    /// Start watching `root`.
    ///
    /// The OS watcher is registered before the baseline walk, so changes made during the
    /// walk are not lost. When `options.initial_render` is set the preview is seeded before
    /// this returns. Fails if the root is unreadable, an ignore pattern is invalid, or the
    /// watcher cannot be registered.
    pub async fn start(
        root: impl AsRef<Path>,
        options: WatchOptions,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|source| Error::RootUnreadable {
                path: root.to_path_buf(),
                source,
            })?;
        check_root(&root)?;

        let matcher = Arc::new(IgnoreMatcher::new(&root, &options.ignore_patterns)?);
        let (watcher, raw_rx) = start_watcher(&root, Arc::clone(&matcher))?;

        let started = Instant::now();
        let baseline = walk_baseline(&root, &matcher)?;
        let applier = Arc::new(ReloadApplier::new(options.history_limit));
        let pipeline = ReloadPipeline::new(
            &root,
            &baseline,
            renderer,
            options.render_timeout,
            Arc::clone(&applier),
        );
        let graph = pipeline.graph();

        if options.initial_render {
            pipeline.seed().await;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let slot = Arc::new(BatchSlot::new());
        let scheduler_task = tokio::spawn(run_scheduler(
            raw_rx,
            options.debounce,
            Arc::clone(&slot),
            shutdown_rx.clone(),
        ));
        let pipeline_task = tokio::spawn(run_pipeline(pipeline, slot, shutdown_rx));

        info!(
            root = %root.display(),
            files = baseline.len(),
            debounce_ms = options.debounce.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "watch session started"
        );

        Ok(Self {
            root,
            applier,
            graph,
            watcher,
            shutdown,
            scheduler_task,
            pipeline_task,
        })
    }

    /// Stop the session.
    ///
    /// The watcher is released first, a pending debounce window and any queued batch are
    /// discarded, and a run already in flight completes. Subscriptions end afterwards.
    pub async fn stop(self) {
        self.watcher.stop().await;
        let _ = self.shutdown.send(true);

        if let Err(err) = self.scheduler_task.await {
            warn!(error = %err, "scheduler task failed");
        }
        if let Err(err) = self.pipeline_task.await {
            warn!(error = %err, "pipeline task failed");
        }

        self.applier.close();
        info!(root = %self.root.display(), "watch session stopped");
    }

    /// Canonical project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self, capacity: usize, policy: OverflowPolicy) -> Subscription {
        self.applier.subscribe(capacity, policy)
    }

    /// Call `callback` for every successful reload until the session stops.
    pub fn on_reload_complete<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&ReloadCompleted) + Send + 'static,
    {
        let mut sub = self.subscribe(CALLBACK_CAPACITY, OverflowPolicy::DropOldest);
        tokio::spawn(async move {
            while let Some(notification) = sub.recv().await {
                if let ReloadNotification::Completed(done) = &notification {
                    callback(done);
                }
            }
        })
    }

    /// Call `callback` for every failed reload until the session stops.
    pub fn on_reload_failed<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&ReloadFailed) + Send + 'static,
    {
        let mut sub = self.subscribe(CALLBACK_CAPACITY, OverflowPolicy::DropOldest);
        tokio::spawn(async move {
            while let Some(notification) = sub.recv().await {
                if let ReloadNotification::Failed(failed) = &notification {
                    callback(failed);
                }
            }
        })
    }

    pub fn stats(&self) -> ReloadStats {
        self.applier.stats()
    }

    /// Up to `limit` most recent reload records, newest first.
    pub fn history(&self, limit: usize) -> Vec<ReloadRecord> {
        self.applier.history(limit)
    }

    pub fn current_preview(&self) -> PreviewState {
        self.applier.preview()
    }

    /// Direct dependents of `path` (absolute, or relative to the root), sorted.
    pub fn dependents_of(&self, path: impl AsRef<Path>) -> Vec<PathBuf> {
        let path = path.as_ref();
        let rel = if path.is_absolute() {
            match relative_to(&self.root, path) {
                Some(rel) => rel,
                None => return Vec::new(),
            }
        } else {
            path.to_path_buf()
        };
        self.graph
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .lookup(&rel)
            .into_iter()
            .collect()
    }

    /// Number of dependency edges currently in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .edge_count()
    }
}

/// Accumulate raw events and offer a batch to the slot whenever a window settles.
async fn run_scheduler(
    mut raw_rx: mpsc::Receiver<RawChangeEvent>,
    window: Duration,
    slot: Arc<BatchSlot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut scheduler = BatchScheduler::new(window);

    loop {
        let deadline = scheduler.deadline();
        let wake = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = raw_rx.recv() => match event {
                Some(event) => scheduler.push(event),
                None => break,
            },
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                if let Some(batch) = scheduler.poll(Instant::now()) {
                    debug!(files = batch.len(), "batch flushed");
                    slot.offer(batch);
                }
            }
        }
    }

    let discarded = scheduler.cancel();
    if discarded > 0 {
        debug!(events = discarded, "discarded pending events on shutdown");
    }
}

/// Run queued batches one at a time. Shutdown is only observed between runs.
async fn run_pipeline(
    mut pipeline: ReloadPipeline,
    slot: Arc<BatchSlot>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = slot.ready() => {}
        }
        if let Some(batch) = slot.take() {
            pipeline.process(batch).await;
        }
    }

    if let Some(batch) = slot.take() {
        debug!(files = batch.len(), "discarded queued batch on shutdown");
    }
}
