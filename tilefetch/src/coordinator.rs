//! Fetch coordinator facade.
//!
//! `FetchCoordinator` wires the registry, cancellation aggregation, timeout
//! and transport together behind a single `fetch` operation:
//!
//! ```text
//! Caller A ─┐
//!           │                                   Transport
//! Caller B ─┼──► FetchCoordinator ────────────► (one HTTP
//!           │        │                           request)
//! Caller C ─┘        │                              │
//!                    ▼                              ▼
//!              [A, B, C each                  [One driver task]
//!               receive their                       │
//!               own copy]◄─────────────────────────┘
//! ```
//!
//! The first caller for a key spawns a detached driver task that runs the
//! transport to settlement; later callers subscribe to the same entry. The
//! driver is independent of any caller, so a caller cancelling its own
//! interest never aborts the shared download while siblings remain.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{CancelReason, FetchError, TransportError};
use crate::key::{FetchKey, TileFormat};
use crate::registry::{FetchOutcome, InFlightRegistry, PendingEntry, Registration};
use crate::response::FetchResponse;
use crate::stats::{CoalesceStats, StatsRecorder};
use crate::transport::Transport;

/// Default shared timeout for a new download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`FetchCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Duration after which an unsettled download is force-cancelled with
    /// reason `timeout`. `None` disables the shared timeout.
    pub timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_FETCH_TIMEOUT),
        }
    }
}

impl CoordinatorConfig {
    /// Set the shared timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable the shared timeout.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }
}

/// Coordinates concurrent fetches of the same resource into single-flight
/// transport operations.
///
/// Each coordinator instance owns its registry; dropping the coordinator
/// releases all in-flight bookkeeping. Cloneable via `Arc` in callers.
pub struct FetchCoordinator {
    registry: Arc<InFlightRegistry>,
    transport: Arc<dyn Transport>,
    config: CoordinatorConfig,
    stats: StatsRecorder,
}

impl FetchCoordinator {
    /// Create a coordinator over the given transport.
    pub fn new(transport: Arc<dyn Transport>, config: CoordinatorConfig) -> Self {
        Self {
            registry: Arc::new(InFlightRegistry::new()),
            transport,
            config,
            stats: StatsRecorder::default(),
        }
    }

    /// Create a coordinator with the default reqwest transport.
    pub fn with_default_transport(config: CoordinatorConfig) -> Result<Self, TransportError> {
        let transport = crate::transport::ReqwestTransport::new()?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Fetch `url` in the default format, coalescing with any in-flight
    /// download of the same resource.
    pub async fn fetch(
        &self,
        url: impl Into<String>,
        caller: CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        self.fetch_with_format(url, TileFormat::default(), caller)
            .await
    }

    /// Fetch `url` in the given format.
    ///
    /// Exactly one transport invocation runs per distinct key per
    /// generation; every caller awaiting that generation receives its own
    /// independently consumable copy of the outcome.
    ///
    /// Returns [`FetchError::Cancelled`] if `caller` fires before
    /// settlement; sibling subscribers are unaffected.
    pub async fn fetch_with_format(
        &self,
        url: impl Into<String>,
        format: TileFormat,
        caller: CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let key = FetchKey::new(url, format);
        let Registration {
            entry,
            mut receiver,
            is_new,
        } = self.registry.lookup_or_create(key);

        if is_new {
            self.stats.record_new();
            if let Some(timeout) = self.config.timeout {
                entry.timeout().arm(timeout, entry.aggregate().clone());
            }
            self.spawn_driver(Arc::clone(&entry), format);
        } else {
            self.stats.record_coalesced();
            debug!(key = %entry.key(), "Coalescing fetch, joining in-flight download");
        }

        // The receiver is polled first: a settled outcome is delivered even
        // if the caller's token fires in the same instant.
        tokio::select! {
            biased;

            outcome = receiver.recv() => match outcome {
                Ok(result) => result,
                // Entry dropped without settling; report the aggregate's
                // reason if it fired.
                Err(_) => Err(FetchError::Aborted(
                    entry.aggregate().reason().unwrap_or(CancelReason::AllCancelled),
                )),
            },
            _ = caller.cancelled() => {
                // Withdraw this caller's interest only; the shared download
                // keeps running while siblings remain subscribed.
                entry.withdraw();
                debug!(key = %entry.key(), "Caller cancelled its fetch");
                Err(FetchError::Cancelled)
            }
        }
    }

    /// Snapshot of coalescing statistics.
    pub fn stats(&self) -> CoalesceStats {
        self.stats.snapshot()
    }

    /// Number of downloads currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.registry.in_flight_count()
    }

    /// Logs current statistics.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total_requests = stats.total_requests,
            coalesced = stats.coalesced_requests,
            new_requests = stats.new_requests,
            in_flight = self.in_flight_count(),
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "Fetch coalescing statistics"
        );
    }

    /// Spawn the detached task that drives a new entry to settlement.
    fn spawn_driver(&self, entry: Arc<PendingEntry>, format: TileFormat) {
        let registry = Arc::clone(&self.registry);
        let transport = Arc::clone(&self.transport);
        debug!(key = %entry.key(), "Starting transport for new fetch");

        tokio::spawn(async move {
            let cancel = entry.aggregate().token().clone();
            let result = transport.fetch(entry.key().url(), format, &cancel).await;

            let outcome: FetchOutcome = match result {
                Ok(response) => {
                    debug!(key = %entry.key(), bytes = response.len(), "Fetch settled");
                    Ok(response)
                }
                Err(TransportError::Aborted) => {
                    let reason = entry
                        .aggregate()
                        .reason()
                        .unwrap_or(CancelReason::AllCancelled);
                    debug!(key = %entry.key(), reason = %reason, "Fetch aborted");
                    Err(FetchError::Aborted(reason))
                }
                Err(error) => {
                    debug!(key = %entry.key(), error = %error, "Fetch failed");
                    Err(FetchError::Transport(error))
                }
            };

            // Settlement: store the outcome for all subscribers (disarms the
            // timeout), then retire this generation from the registry.
            entry.settle(outcome);
            registry.remove_settled(&entry);
        });
    }
}
