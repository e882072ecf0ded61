use std::collections::VecDeque;
use std::time::SystemTime;

use serde::Serialize;

use crate::impact::ReloadStrategy;

/// Outcome of one reload cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadRecord {
    pub timestamp: SystemTime,
    pub strategy: ReloadStrategy,
    pub file_count: usize,
    pub duration_ms: u64,
    pub success: bool,
}

/// Running counters over every recorded reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReloadStats {
    pub total_reloads: u64,
    pub hot_reloads: u64,
    pub full_reloads: u64,
    pub failed_reloads: u64,
    pub files_processed: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub last_reload_at: Option<SystemTime>,
}

impl ReloadStats {
    fn fold(&mut self, record: &ReloadRecord) {
        self.total_reloads += 1;
        match record.strategy {
            ReloadStrategy::Hot => self.hot_reloads += 1,
            ReloadStrategy::Full => self.full_reloads += 1,
        }
        if !record.success {
            self.failed_reloads += 1;
        }
        self.files_processed += record.file_count as u64;
        self.total_duration_ms += record.duration_ms;
        self.average_duration_ms = self.total_duration_ms as f64 / self.total_reloads as f64;
        self.last_reload_at = Some(record.timestamp);
    }
}

/// Bounded reload history; the oldest record is evicted first.
#[derive(Debug, Clone)]
pub struct ReloadHistory {
    records: VecDeque<ReloadRecord>,
    capacity: usize,
}

impl ReloadHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ReloadRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Up to `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ReloadRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Stats and history updated together.
#[derive(Debug, Clone)]
pub struct ReloadLog {
    stats: ReloadStats,
    history: ReloadHistory,
}

impl ReloadLog {
    pub fn new(history_limit: usize) -> Self {
        Self {
            stats: ReloadStats::default(),
            history: ReloadHistory::new(history_limit),
        }
    }

    pub fn record(&mut self, record: ReloadRecord) {
        self.stats.fold(&record);
        self.history.push(record);
    }

    pub fn stats(&self) -> &ReloadStats {
        &self.stats
    }

    pub fn history(&self) -> &ReloadHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(strategy: ReloadStrategy, files: usize, ms: u64, success: bool) -> ReloadRecord {
        ReloadRecord {
            timestamp: SystemTime::now(),
            strategy,
            file_count: files,
            duration_ms: ms,
            success,
        }
    }

    #[test]
    fn test_stats_fold() {
        let mut log = ReloadLog::new(50);
        log.record(record(ReloadStrategy::Hot, 1, 10, true));
        log.record(record(ReloadStrategy::Full, 2, 30, true));
        log.record(record(ReloadStrategy::Full, 3, 20, false));

        let stats = log.stats();
        assert_eq!(stats.total_reloads, 3);
        assert_eq!(stats.hot_reloads, 1);
        assert_eq!(stats.full_reloads, 2);
        assert_eq!(stats.failed_reloads, 1);
        assert_eq!(stats.files_processed, 6);
        assert!((stats.average_duration_ms - 20.0).abs() < f64::EPSILON);
        assert!(stats.last_reload_at.is_some());
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = ReloadHistory::new(3);
        for files in 1..=5 {
            history.push(record(ReloadStrategy::Hot, files, 1, true));
        }
        assert_eq!(history.len(), 3);
        let counts: Vec<usize> = history.recent(10).iter().map(|r| r.file_count).collect();
        assert_eq!(counts, vec![5, 4, 3]);
    }

    #[test]
    fn test_recent_respects_limit() {
        let mut log = ReloadLog::new(50);
        for _ in 0..10 {
            log.record(record(ReloadStrategy::Hot, 1, 1, true));
        }
        assert_eq!(log.history().recent(4).len(), 4);
        assert_eq!(log.history().recent(0).len(), 0);
    }
}
