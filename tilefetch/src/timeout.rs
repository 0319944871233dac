//! Timeout ownership for in-flight downloads.
//!
//! A [`TimeoutGuard`] is owned one-to-one by a pending entry. The timeout
//! belongs to the shared operation, not to any caller: it is armed once when
//! the entry is created and never rearmed or extended by joiners. Every
//! settlement path disarms it.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cancel::CancellationAggregator;
use crate::error::CancelReason;

/// Countdown tied to one in-flight download.
#[derive(Debug, Default)]
pub struct TimeoutGuard {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutGuard {
    /// Create an unarmed guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the countdown.
    ///
    /// If the countdown elapses before [`disarm`](Self::disarm), the
    /// aggregate fires with reason [`CancelReason::Timeout`], aborting the
    /// shared operation for every subscriber.
    pub fn arm(&self, duration: Duration, aggregate: CancellationAggregator) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            debug!(
                timeout_ms = duration.as_millis() as u64,
                "Fetch timeout elapsed, force-cancelling shared operation"
            );
            aggregate.force_fire(CancelReason::Timeout);
        });
        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the countdown. Idempotent; called on every settlement path.
    pub fn disarm(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Returns true while a countdown is pending.
    pub fn is_armed(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        // Timer resources are released even if a settlement path misses
        // the explicit disarm.
        self.disarm();
    }
}
