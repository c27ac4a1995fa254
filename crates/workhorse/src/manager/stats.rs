//! Process-local counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters updated by worker and heartbeat units
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    fetch_errors: AtomicU64,
    heartbeats: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Jobs acknowledged as successful
    pub processed: u64,
    /// Jobs reported as failed, including unknown job types
    pub failed: u64,
    /// Fetch calls that returned an error
    pub fetch_errors: u64,
    /// Successful heartbeat calls
    pub heartbeats: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = WorkerStats::default();
        stats.record_processed();
        stats.record_processed();
        stats.record_failed();
        stats.record_fetch_error();

        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                processed: 2,
                failed: 1,
                fetch_errors: 1,
                heartbeats: 0,
            }
        );

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["processed"], 2);
    }
}
