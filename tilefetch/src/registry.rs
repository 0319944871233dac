//! In-flight request registry providing the single-flight guarantee.
//!
//! The registry maps each [`FetchKey`] to at most one live [`PendingEntry`].
//! The first caller for a key creates the entry and drives the transport; all
//! later callers subscribe to the same entry and wait for its settlement. No
//! transport call is ever started for a key that already has a live entry.
//!
//! Uses `DashMap` for lock-free concurrent access; the entry API makes
//! lookup-or-create atomic, avoiding the check-then-insert race.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::cancel::CancellationAggregator;
use crate::error::FetchError;
use crate::key::FetchKey;
use crate::response::FetchResponse;
use crate::timeout::TimeoutGuard;

/// Outcome broadcast to every subscriber of an entry at settlement.
pub type FetchOutcome = Result<FetchResponse, FetchError>;

/// Broadcast capacity per entry. Only one message is ever sent, but a little
/// headroom keeps subscribe/send ordering forgiving.
const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Settlement state of a pending entry. Transitions exactly once from
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleState {
    /// Transport still running.
    Pending,
    /// Transport completed with a response.
    Succeeded,
    /// Transport failed or the operation was force-cancelled.
    Failed,
}

/// One in-flight coordinated download, from creation to settlement.
///
/// Owned exclusively by the registry; subscribers hold only a broadcast
/// receiver to await, never the entry itself.
#[derive(Debug)]
pub struct PendingEntry {
    key: FetchKey,
    aggregate: CancellationAggregator,
    timeout: TimeoutGuard,
    /// Guards the settle transition and subscription atomicity.
    state: Mutex<SettleState>,
    sender: broadcast::Sender<FetchOutcome>,
}

impl PendingEntry {
    /// Create a fresh pending entry with its first subscription.
    ///
    /// The creator's subscription is counted immediately; the entry is not
    /// visible to other callers until the registry inserts it.
    fn new(key: FetchKey) -> (Arc<Self>, broadcast::Receiver<FetchOutcome>) {
        let (sender, receiver) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let entry = Arc::new(Self {
            key,
            aggregate: CancellationAggregator::new(),
            timeout: TimeoutGuard::new(),
            state: Mutex::new(SettleState::Pending),
            sender,
        });
        entry.aggregate.add_subscriber();
        (entry, receiver)
    }

    /// The key identifying this entry.
    pub fn key(&self) -> &FetchKey {
        &self.key
    }

    /// The cancellation aggregator owned by this entry.
    pub fn aggregate(&self) -> &CancellationAggregator {
        &self.aggregate
    }

    /// The timeout guard owned by this entry.
    pub fn timeout(&self) -> &TimeoutGuard {
        &self.timeout
    }

    /// Current settlement state.
    pub fn settle_state(&self) -> SettleState {
        *self.state.lock()
    }

    /// Returns true once the entry has settled.
    pub fn is_settled(&self) -> bool {
        self.settle_state() != SettleState::Pending
    }

    /// Subscribe to this entry's settlement, counting the subscriber.
    ///
    /// Returns `None` if the entry has already settled or its aggregate has
    /// fired; the caller must then start a fresh generation. Holding the
    /// state lock across the count increment and the subscribe guarantees a
    /// joiner is counted before any withdrawal can fire the aggregate, and
    /// can never miss the broadcast.
    fn subscribe(&self) -> Option<broadcast::Receiver<FetchOutcome>> {
        let state = self.state.lock();
        if *state != SettleState::Pending || self.aggregate.is_fired() {
            return None;
        }
        self.aggregate.add_subscriber();
        Some(self.sender.subscribe())
    }

    /// Withdraw one caller's interest in this entry.
    ///
    /// Serialized against [`subscribe`](Self::subscribe) on the state lock,
    /// so the count-to-zero fire can never overtake a joiner that already
    /// holds a receiver. No-op once the entry has settled.
    pub(crate) fn withdraw(&self) {
        let state = self.state.lock();
        if *state != SettleState::Pending {
            return;
        }
        self.aggregate.remove_subscriber();
    }

    /// Settle the entry, broadcasting the outcome to every subscriber.
    ///
    /// Returns false if the entry was already settled (the transition happens
    /// exactly once). Disarms the timeout on every path.
    pub(crate) fn settle(&self, outcome: FetchOutcome) -> bool {
        let mut state = self.state.lock();
        if *state != SettleState::Pending {
            return false;
        }
        *state = if outcome.is_ok() {
            SettleState::Succeeded
        } else {
            SettleState::Failed
        };
        self.timeout.disarm();
        // Receivers may already have been dropped; that is not an error.
        let _ = self.sender.send(outcome);
        true
    }

    /// Number of subscribers currently awaiting this entry.
    pub fn waiter_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Result of registering interest in a key.
///
/// The caller's subscription is already counted in the entry's aggregate;
/// withdrawing it goes through [`PendingEntry::withdraw`].
pub struct Registration {
    /// The entry this caller joined or created.
    pub entry: Arc<PendingEntry>,
    /// Receiver resolving at settlement.
    pub receiver: broadcast::Receiver<FetchOutcome>,
    /// True if this caller created the entry and must drive the transport.
    pub is_new: bool,
}

/// Process-wide map from fetch key to the single in-flight entry.
///
/// Owned by the coordinator instance; no global singleton.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    entries: DashMap<FetchKey, Arc<PendingEntry>>,
}

impl InFlightRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the live entry for `key`, or atomically create one.
    ///
    /// A caller that observes an entry settled-but-not-yet-removed replaces
    /// it with a fresh generation rather than subscribing to a result it can
    /// no longer receive.
    pub fn lookup_or_create(&self, key: FetchKey) -> Registration {
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if let Some(receiver) = occupied.get().subscribe() {
                    let entry = Arc::clone(occupied.get());
                    debug!(key = %entry.key(), "Joining in-flight fetch");
                    return Registration {
                        entry,
                        receiver,
                        is_new: false,
                    };
                }
                // Settled (or force-cancelled) in the window before removal:
                // start a fresh generation under the same shard lock.
                let (entry, receiver) = PendingEntry::new(occupied.key().clone());
                occupied.insert(Arc::clone(&entry));
                debug!(key = %entry.key(), "Previous generation retired, starting fresh fetch");
                Registration {
                    entry,
                    receiver,
                    is_new: true,
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (entry, receiver) = PendingEntry::new(vacant.key().clone());
                vacant.insert(Arc::clone(&entry));
                debug!(key = %entry.key(), "New fetch registered");
                Registration {
                    entry,
                    receiver,
                    is_new: true,
                }
            }
        }
    }

    /// Remove a settled entry from the registry.
    ///
    /// Removal is by pointer identity so a settling generation can never
    /// evict a fresh successor registered under the same key. Idempotent.
    pub fn remove_settled(&self, entry: &Arc<PendingEntry>) {
        self.entries
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry));
    }

    /// Number of currently in-flight entries.
    pub fn in_flight_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TileFormat;

    fn test_key(path: &str) -> FetchKey {
        FetchKey::new(format!("https://tiles.test/{path}"), TileFormat::Jpeg)
    }

    fn test_response() -> FetchResponse {
        FetchResponse::new(vec![0xDDu8, 0x53, 0x20])
    }

    #[tokio::test]
    async fn test_first_registration_is_new() {
        let registry = InFlightRegistry::new();

        let reg = registry.lookup_or_create(test_key("a"));

        assert!(reg.is_new);
        assert_eq!(registry.in_flight_count(), 1);
        assert_eq!(reg.entry.settle_state(), SettleState::Pending);
    }

    #[tokio::test]
    async fn test_second_registration_joins() {
        let registry = InFlightRegistry::new();

        let first = registry.lookup_or_create(test_key("a"));
        let second = registry.lookup_or_create(test_key("a"));

        assert!(first.is_new);
        assert!(!second.is_new);
        assert!(Arc::ptr_eq(&first.entry, &second.entry));
        assert_eq!(registry.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_different_keys_not_coalesced() {
        let registry = InFlightRegistry::new();

        let first = registry.lookup_or_create(test_key("a"));
        let second = registry.lookup_or_create(test_key("b"));

        assert!(first.is_new);
        assert!(second.is_new);
        assert_eq!(registry.in_flight_count(), 2);
    }

    #[tokio::test]
    async fn test_settle_broadcasts_to_all_subscribers() {
        let registry = InFlightRegistry::new();

        let first = registry.lookup_or_create(test_key("a"));
        let mut rx1 = first.receiver;
        let mut rx2 = registry.lookup_or_create(test_key("a")).receiver;

        assert!(first.entry.settle(Ok(test_response())));

        let a = rx1.recv().await.unwrap().unwrap();
        let b = rx2.recv().await.unwrap().unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[tokio::test]
    async fn test_settle_is_exactly_once() {
        let registry = InFlightRegistry::new();
        let reg = registry.lookup_or_create(test_key("a"));

        assert!(reg.entry.settle(Ok(test_response())));
        assert!(!reg.entry.settle(Err(FetchError::Cancelled)));
        assert_eq!(reg.entry.settle_state(), SettleState::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_settle_state() {
        let registry = InFlightRegistry::new();
        let reg = registry.lookup_or_create(test_key("a"));

        reg.entry
            .settle(Err(crate::error::TransportError::Network("reset".into()).into()));
        assert_eq!(reg.entry.settle_state(), SettleState::Failed);
    }

    #[tokio::test]
    async fn test_withdrawal_after_join_leaves_aggregate_unfired() {
        let registry = InFlightRegistry::new();

        let first = registry.lookup_or_create(test_key("a"));
        let second = registry.lookup_or_create(test_key("a"));

        // The creator withdraws after the joiner has registered. The joiner
        // was counted atomically with its subscription, so it still holds
        // live interest and the aggregate must not fire.
        first.entry.withdraw();

        assert!(!second.entry.aggregate().is_fired());
        assert_eq!(second.entry.aggregate().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_sole_subscriber_withdrawal_fires_aggregate() {
        let registry = InFlightRegistry::new();
        let reg = registry.lookup_or_create(test_key("a"));

        reg.entry.withdraw();

        assert!(reg.entry.aggregate().is_fired());
        assert_eq!(
            reg.entry.aggregate().reason(),
            Some(crate::error::CancelReason::AllCancelled)
        );
    }

    #[tokio::test]
    async fn test_withdraw_after_settlement_is_a_no_op() {
        let registry = InFlightRegistry::new();
        let reg = registry.lookup_or_create(test_key("a"));

        reg.entry.settle(Ok(test_response()));
        reg.entry.withdraw();

        assert!(!reg.entry.aggregate().is_fired());
    }

    #[tokio::test]
    async fn test_fired_entry_is_replaced_by_fresh_generation() {
        let registry = InFlightRegistry::new();

        let first = registry.lookup_or_create(test_key("a"));
        // Last subscriber gone: the aggregate fires, dooming the entry.
        first.entry.withdraw();

        // A joiner arriving before the driver settles must not board the
        // doomed entry; it retries against a fresh generation.
        let second = registry.lookup_or_create(test_key("a"));
        assert!(second.is_new);
        assert!(!Arc::ptr_eq(&first.entry, &second.entry));
        assert!(!second.entry.aggregate().is_fired());
    }

    #[tokio::test]
    async fn test_settled_entry_is_replaced_by_fresh_generation() {
        let registry = InFlightRegistry::new();

        let first = registry.lookup_or_create(test_key("a"));
        first.entry.settle(Ok(test_response()));

        // Entry settled but not yet removed: a joiner must get a fresh
        // generation, not a spent receiver.
        let second = registry.lookup_or_create(test_key("a"));
        assert!(second.is_new);
        assert!(!Arc::ptr_eq(&first.entry, &second.entry));
    }

    #[tokio::test]
    async fn test_remove_settled_is_by_identity() {
        let registry = InFlightRegistry::new();

        let first = registry.lookup_or_create(test_key("a"));
        first.entry.settle(Ok(test_response()));
        let second = registry.lookup_or_create(test_key("a"));

        // The stale generation's removal must not evict its successor.
        registry.remove_settled(&first.entry);
        assert_eq!(registry.in_flight_count(), 1);

        let third = registry.lookup_or_create(test_key("a"));
        assert!(!third.is_new);
        assert!(Arc::ptr_eq(&second.entry, &third.entry));
    }

    #[tokio::test]
    async fn test_remove_settled_is_idempotent() {
        let registry = InFlightRegistry::new();
        let reg = registry.lookup_or_create(test_key("a"));

        reg.entry.settle(Ok(test_response()));
        registry.remove_settled(&reg.entry);
        registry.remove_settled(&reg.entry);
        assert_eq!(registry.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_registration_single_flight() {
        let registry = Arc::new(InFlightRegistry::new());

        let mut handles = vec![];
        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.lookup_or_create(test_key("a")).is_new
            }));
        }

        let results: Vec<bool> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let new_count = results.iter().filter(|is_new| **is_new).count();
        assert_eq!(new_count, 1, "exactly one registration should be new");
        assert_eq!(registry.in_flight_count(), 1);
    }
}
