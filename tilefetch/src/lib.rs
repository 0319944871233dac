//! TileFetch - concurrent download coordination for map tile streaming
//!
//! This library deduplicates concurrent downloads of the same tile: when many
//! independent callers request the same resource while a download is already
//! in flight, only one transport operation runs and every caller receives an
//! independently consumable copy of its result.
//!
//! Cancellation is conjunctive: each caller can withdraw its own interest at
//! any time, but the shared operation is aborted only once *every* interested
//! caller has withdrawn (or a shared timeout elapses).
//!
//! # Example
//!
//! ```ignore
//! use tilefetch::{CoordinatorConfig, FetchCoordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! let coordinator = FetchCoordinator::with_default_transport(CoordinatorConfig::default())?;
//!
//! // Concurrent fetches of the same URL share one HTTP request.
//! let response = coordinator
//!     .fetch("https://tiles.example.com/18/100000/125184", CancellationToken::new())
//!     .await?;
//! ```

pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod registry;
pub mod response;
pub mod stats;
pub mod timeout;
pub mod transport;

pub use cancel::CancellationAggregator;
pub use coordinator::{CoordinatorConfig, FetchCoordinator};
pub use error::{CancelReason, FetchError, TransportError};
pub use key::{FetchKey, TileFormat};
pub use registry::{FetchOutcome, InFlightRegistry, PendingEntry, SettleState};
pub use response::FetchResponse;
pub use stats::CoalesceStats;
pub use transport::{BoxFuture, ReqwestTransport, Transport};
