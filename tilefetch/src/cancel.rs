//! Conjunctive cancellation aggregation.
//!
//! Each in-flight download owns one [`CancellationAggregator`]. Callers
//! joining the download register as subscribers; a caller withdrawing (its own
//! token fired) deregisters. The aggregate token - the signal the transport
//! actually observes - fires only when the subscriber count drops to zero, or
//! when the timeout daemon forces it.
//!
//! With N concurrent callers the shared operation therefore survives N-1
//! withdrawals and is aborted only by the Nth. There is no library combinator
//! with these semantics ("any-of" combinators cancel on the *first* signal),
//! so the count is tracked explicitly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CancelReason;

#[derive(Debug)]
struct Inner {
    /// The derived token observed by the transport.
    token: CancellationToken,
    /// Number of callers still interested in the result.
    subscribers: AtomicUsize,
    /// First firing reason wins; `Some` once fired.
    reason: Mutex<Option<CancelReason>>,
}

/// Reference-counted N-of-N cancellation token.
///
/// Cheap to clone; clones share the same subscriber count and aggregate
/// token. Firing is idempotent and irreversible.
#[derive(Debug, Clone)]
pub struct CancellationAggregator {
    inner: Arc<Inner>,
}

impl CancellationAggregator {
    /// Create an aggregator with zero subscribers and an unfired token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                subscribers: AtomicUsize::new(0),
                reason: Mutex::new(None),
            }),
        }
    }

    /// The aggregate token handed to the transport as its cancellation signal.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Register one caller's interest.
    pub fn add_subscriber(&self) {
        self.inner.subscribers.fetch_add(1, Ordering::AcqRel);
    }

    /// Withdraw one caller's interest.
    ///
    /// When the last remaining subscriber withdraws, the aggregate fires with
    /// reason [`CancelReason::AllCancelled`].
    pub fn remove_subscriber(&self) {
        let previous = self.inner.subscribers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "subscriber count underflow");
        if previous == 1 {
            debug!("Last subscriber withdrew, firing aggregate token");
            self.fire(CancelReason::AllCancelled);
        }
    }

    /// Force the aggregate to fire with the given reason.
    ///
    /// Used by the timeout daemon (`reason = Timeout`). Idempotent: the first
    /// reason wins and later calls are no-ops.
    pub fn force_fire(&self, reason: CancelReason) {
        self.fire(reason);
    }

    /// Returns true once the aggregate token has fired.
    pub fn is_fired(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The reason the aggregate fired, if it has.
    pub fn reason(&self) -> Option<CancelReason> {
        *self.inner.reason.lock()
    }

    /// Number of callers currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load(Ordering::Acquire)
    }

    fn fire(&self, reason: CancelReason) {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
            self.inner.token.cancel();
        }
    }
}

impl Default for CancellationAggregator {
    fn default() -> Self {
        Self::new()
    }
}
