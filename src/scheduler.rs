//! Debouncing of raw events into batches.
//!
//! [`BatchScheduler`] is a synchronous state machine driven by caller-supplied
//! monotonic instants, so the one-pending-batch invariant can be tested without sleeping.
//! [`BatchSlot`] is the depth-1 hand-off between the scheduler and the pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::watcher::event::{RawChangeEvent, RawKind};

/// Deduplicated set of raw events from one debounce window, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    events: BTreeMap<PathBuf, RawChangeEvent>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from events in arrival order; the last event per path wins.
    pub fn from_events(events: impl IntoIterator<Item = RawChangeEvent>) -> Self {
        let mut batch = Self::new();
        for event in events {
            batch.insert(event);
        }
        batch
    }

    pub fn insert(&mut self, event: RawChangeEvent) {
        self.events.insert(event.path.clone(), event);
    }

    /// Fold a later batch into this one, keeping the later event per path.
    pub fn absorb(&mut self, later: ChangeBatch) {
        self.events.extend(later.events);
    }

    pub fn get(&self, path: &Path) -> Option<&RawChangeEvent> {
        self.events.get(path)
    }

    pub fn events(&self) -> impl Iterator<Item = &RawChangeEvent> {
        self.events.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.events.keys()
    }

    pub fn kind_of(&self, path: &Path) -> Option<RawKind> {
        self.events.get(path).map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl IntoIterator for ChangeBatch {
    type Item = RawChangeEvent;
    type IntoIter = std::collections::btree_map::IntoValues<PathBuf, RawChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_values()
    }
}

/// State of the single pending-batch timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Accumulating { deadline: Instant },
}

/// Coalesces raw events until no new event has arrived for one settling window.
#[derive(Debug)]
pub struct BatchScheduler {
    window: Duration,
    state: DebounceState,
    pending: ChangeBatch,
}

impl BatchScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
            pending: ChangeBatch::new(),
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Accumulating { deadline } => Some(deadline),
        }
    }

    /// Add an event and push the deadline to `observed_at + window`.
    /// The deadline never moves backwards.
    pub fn push(&mut self, event: RawChangeEvent) {
        let candidate = event.observed_at + self.window;
        let deadline = match self.state {
            DebounceState::Accumulating { deadline } if deadline > candidate => deadline,
            _ => candidate,
        };
        self.pending.insert(event);
        self.state = DebounceState::Accumulating { deadline };
    }

    /// Flush the pending batch if the window has elapsed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<ChangeBatch> {
        match self.state {
            DebounceState::Accumulating { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                let batch = std::mem::take(&mut self.pending);
                (!batch.is_empty()).then_some(batch)
            }
            _ => None,
        }
    }

    /// Cancel the pending timer and discard accumulated events. Returns how many were dropped.
    pub fn cancel(&mut self) -> usize {
        self.state = DebounceState::Idle;
        std::mem::take(&mut self.pending).len()
    }
}

/// Depth-1 queue between the scheduler and the pipeline.
///
/// A batch offered while another is still waiting is merged into it, so at most one
/// batch is ever queued behind the run in flight.
#[derive(Debug, Default)]
pub struct BatchSlot {
    queued: Mutex<Option<ChangeBatch>>,
    ready: Notify,
}

impl BatchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, batch: ChangeBatch) {
        {
            let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
            match queued.as_mut() {
                Some(existing) => existing.absorb(batch),
                None => *queued = Some(batch),
            }
        }
        self.ready.notify_one();
    }

    pub fn take(&self) -> Option<ChangeBatch> {
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Wait until a batch has been offered.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }
}
