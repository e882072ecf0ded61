//! Applying updates to the preview slot and notifying subscribers.
//!
//! Delivery is fire-and-forget: every subscriber has its own bounded channel and a send
//! never waits. A full or closed channel only affects that subscriber.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Instant, SystemTime};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::impact::{ReloadPlan, ReloadStrategy};
use crate::stats::{ReloadLog, ReloadRecord, ReloadStats};
use crate::update::{Fragment, PreviewUpdate, RenderOutput, UpdatePayload};

/// The current preview: the last full render plus the hot fragments applied since.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreviewState {
    /// Incremented on every successfully applied cycle.
    pub revision: u64,
    pub document: Option<RenderOutput>,
    pub fragments: BTreeMap<PathBuf, Fragment>,
    pub updated_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadCompleted {
    pub strategy: ReloadStrategy,
    pub affected_files: Vec<PathBuf>,
    pub dependent_files: Vec<PathBuf>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadFailed {
    pub error: String,
    pub affected_files: Vec<PathBuf>,
    pub dependent_files: Vec<PathBuf>,
}

/// One notification per completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReloadNotification {
    Completed(ReloadCompleted),
    Failed(ReloadFailed),
}

/// What a subscriber's channel does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Keep the newest notifications; the oldest unread ones are lost.
    #[default]
    DropOldest,
    /// Keep what is queued; new notifications are lost.
    DropNewest,
}

enum SubscriberTx {
    Oldest(broadcast::Sender<ReloadNotification>),
    Newest(mpsc::Sender<ReloadNotification>),
}

struct Subscriber {
    tx: SubscriberTx,
    dropped: Arc<AtomicU64>,
}

impl Subscriber {
    /// Non-blocking send. Returns false once the receiving side is gone.
    fn deliver(&self, notification: &ReloadNotification) -> bool {
        match &self.tx {
            SubscriberTx::Oldest(tx) => tx.send(notification.clone()).is_ok(),
            SubscriberTx::Newest(tx) => match tx.try_send(notification.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }
}

enum SubscriptionRx {
    Oldest(broadcast::Receiver<ReloadNotification>),
    Newest(mpsc::Receiver<ReloadNotification>),
}

/// Receiving end of a subscription. Yields `None` once the session has stopped.
pub struct Subscription {
    rx: SubscriptionRx,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ReloadNotification> {
        match &mut self.rx {
            SubscriptionRx::Newest(rx) => rx.recv().await,
            SubscriptionRx::Oldest(rx) => loop {
                match rx.recv().await {
                    Ok(n) => return Some(n),
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        self.dropped.fetch_add(count, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Next queued notification without waiting.
    pub fn try_recv(&mut self) -> Option<ReloadNotification> {
        match &mut self.rx {
            SubscriptionRx::Newest(rx) => rx.try_recv().ok(),
            SubscriptionRx::Oldest(rx) => loop {
                match rx.try_recv() {
                    Ok(n) => return Some(n),
                    Err(broadcast::error::TryRecvError::Lagged(count)) => {
                        self.dropped.fetch_add(count, Ordering::Relaxed);
                    }
                    Err(_) => return None,
                }
            },
        }
    }

    /// Notifications lost to this subscriber's overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the preview slot, the reload log, and the subscriber list of one session.
pub struct ReloadApplier {
    preview: RwLock<PreviewState>,
    log: Mutex<ReloadLog>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ReloadApplier {
    pub fn new(history_limit: usize) -> Self {
        Self {
            preview: RwLock::new(PreviewState::default()),
            log: Mutex::new(ReloadLog::new(history_limit)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber with its own bounded channel.
    ///
    /// With [`OverflowPolicy::DropOldest`] the capacity is rounded up to a power of two.
    pub fn subscribe(&self, capacity: usize, policy: OverflowPolicy) -> Subscription {
        let capacity = capacity.max(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let (tx, rx) = match policy {
            OverflowPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (SubscriberTx::Oldest(tx), SubscriptionRx::Oldest(rx))
            }
            OverflowPolicy::DropNewest => {
                let (tx, rx) = mpsc::channel(capacity);
                (SubscriberTx::Newest(tx), SubscriptionRx::Newest(rx))
            }
        };
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                tx,
                dropped: Arc::clone(&dropped),
            });
        Subscription { rx, dropped }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Install an initial render without recording a reload.
    pub fn seed(&self, update: PreviewUpdate) {
        if let UpdatePayload::Document(document) = update.payload {
            let mut preview = self.preview.write().unwrap_or_else(|e| e.into_inner());
            *preview = PreviewState {
                revision: preview.revision + 1,
                document: Some(document),
                fragments: BTreeMap::new(),
                updated_at: Some(update.timestamp),
            };
        }
    }

    /// Apply a successful cycle's updates, record it, and notify subscribers.
    ///
    /// A full update replaces the preview in one swap; hot fragments are merged in.
    pub fn apply(
        &self,
        plan: &ReloadPlan,
        updates: Vec<PreviewUpdate>,
        started: Instant,
    ) -> ReloadRecord {
        let now = SystemTime::now();
        {
            let mut preview = self.preview.write().unwrap_or_else(|e| e.into_inner());
            let mut next = match plan.strategy {
                ReloadStrategy::Full => PreviewState {
                    revision: preview.revision,
                    ..PreviewState::default()
                },
                ReloadStrategy::Hot => preview.clone(),
            };
            for path in &plan.removed_files {
                next.fragments.remove(path);
            }
            for update in updates {
                match update.payload {
                    UpdatePayload::Document(document) => next.document = Some(document),
                    UpdatePayload::Fragment(fragment) => {
                        next.fragments.insert(fragment.path.clone(), fragment);
                    }
                }
            }
            next.revision += 1;
            next.updated_at = Some(now);
            *preview = next;
        }

        let record = self.record(plan, started, true);
        info!(
            strategy = %plan.strategy,
            files = plan.affected_files.len(),
            dependents = plan.dependent_files.len(),
            duration_ms = record.duration_ms,
            "reload applied"
        );
        self.publish(ReloadNotification::Completed(ReloadCompleted {
            strategy: plan.strategy,
            affected_files: plan.affected_files.clone(),
            dependent_files: plan.dependent_files.clone(),
            duration_ms: record.duration_ms,
        }));
        record
    }

    /// Record a failed cycle. The preview keeps its last applied state.
    pub fn fail(&self, plan: &ReloadPlan, error: &Error, started: Instant) -> ReloadRecord {
        let record = self.record(plan, started, false);
        warn!(
            strategy = %plan.strategy,
            files = plan.affected_files.len(),
            error = %error,
            "reload failed"
        );
        self.publish(ReloadNotification::Failed(ReloadFailed {
            error: error.to_string(),
            affected_files: plan.affected_files.clone(),
            dependent_files: plan.dependent_files.clone(),
        }));
        record
    }

    pub fn preview(&self) -> PreviewState {
        self.preview
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn stats(&self) -> ReloadStats {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stats()
            .clone()
    }

    /// Up to `limit` most recent records, newest first.
    pub fn history(&self, limit: usize) -> Vec<ReloadRecord> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history()
            .recent(limit)
    }

    /// Drop every subscriber; their receivers end after draining queued notifications.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn record(&self, plan: &ReloadPlan, started: Instant, success: bool) -> ReloadRecord {
        let record = ReloadRecord {
            timestamp: SystemTime::now(),
            strategy: plan.strategy,
            file_count: plan.affected_files.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            success,
        };
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(record.clone());
        record
    }

    fn publish(&self, notification: ReloadNotification) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|s| s.deliver(&notification));
        if subscribers.len() < before {
            debug!(removed = before - subscribers.len(), "dropped closed subscribers");
        }
    }
}
