//! Pipeline counters.
//!
//! Counters only; decode failures and late drops are recovered locally and
//! these are their only trace besides logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters, incremented by workers and the coordinator.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    records_decoded: AtomicU64,
    records_rejected: AtomicU64,
    late_events: AtomicU64,
    windows_emitted: AtomicU64,
    checkpoints_completed: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_decoded: u64,
    pub records_rejected: u64,
    pub late_events: u64,
    pub windows_emitted: u64,
    pub checkpoints_completed: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decoded(&self) {
        self.records_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn late_event(&self) {
        self.late_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn windows_emitted(&self, count: u64) {
        self.windows_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn checkpoint_completed(&self) {
        self.checkpoints_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_decoded: self.records_decoded.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            late_events: self.late_events.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            checkpoints_completed: self.checkpoints_completed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_decoded();
        metrics.record_decoded();
        metrics.record_rejected();
        metrics.windows_emitted(3);
        let snap = metrics.snapshot();
        assert_eq!(snap.records_decoded, 2);
        assert_eq!(snap.records_rejected, 1);
        assert_eq!(snap.late_events, 0);
        assert_eq!(snap.windows_emitted, 3);
    }
}
