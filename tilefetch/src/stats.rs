//! Coalescing statistics.
//!
//! Counters use atomics for lock-free updates from concurrent fetch calls.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of coalescing effectiveness.
#[derive(Debug, Default, Clone)]
pub struct CoalesceStats {
    /// Total fetch requests received.
    pub total_requests: u64,
    /// Requests that joined an existing in-flight download.
    pub coalesced_requests: u64,
    /// Requests that started a new download.
    pub new_requests: u64,
}

impl CoalesceStats {
    /// Returns the coalescing ratio (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Lock-free recorder backing [`CoalesceStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    coalesced_requests: AtomicU64,
    new_requests: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_new(&self) {
        self.new_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoalesceStats {
        let coalesced = self.coalesced_requests.load(Ordering::Relaxed);
        let new = self.new_requests.load(Ordering::Relaxed);
        CoalesceStats {
            total_requests: coalesced + new,
            coalesced_requests: coalesced,
            new_requests: new,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ratio_is_zero() {
        assert_eq!(CoalesceStats::default().coalescing_ratio(), 0.0);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.record_new();
        recorder.record_coalesced();
        recorder.record_coalesced();
        recorder.record_coalesced();

        let stats = recorder.snapshot();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.new_requests, 1);
        assert_eq!(stats.coalesced_requests, 3);
        assert!((stats.coalescing_ratio() - 0.75).abs() < 0.001);
    }
}
