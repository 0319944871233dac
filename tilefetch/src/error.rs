//! Error types for the fetch coordinator.
//!
//! Failures split into three kinds with different propagation scopes:
//! - [`TransportError`]: the underlying download failed; broadcast to every
//!   subscriber of that generation.
//! - [`FetchError::Cancelled`]: one caller's own token fired; local to that
//!   caller, siblings are unaffected.
//! - [`FetchError::Aborted`]: the shared operation was force-cancelled
//!   (timeout or all callers withdrew); broadcast to every subscriber.
//!
//! Nothing here is retried automatically - retry policy belongs to the caller.

use std::fmt;

use thiserror::Error;

/// Errors produced by the underlying transport.
///
/// `Clone` so one failure can be delivered to all subscribers of the
/// in-flight operation that produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Server responded with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Connection or protocol level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Failed to construct the HTTP client.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    /// The transport observed its cancellation signal and stopped.
    #[error("Transport aborted by cancellation signal")]
    Aborted,
}

/// Why a shared in-flight operation was force-cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Every subscriber withdrew its interest.
    AllCancelled,
    /// The shared timeout elapsed before settlement.
    Timeout,
}

impl CancelReason {
    /// Returns the wire-level reason string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::AllCancelled => "all-cancelled",
            CancelReason::Timeout => "timeout",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned to a caller awaiting a coordinated fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The shared download failed; every subscriber of that generation
    /// receives this error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// This caller's own cancellation token fired before settlement
    /// (caller-cancelled). Sibling subscribers are unaffected.
    #[error("Fetch cancelled by caller (caller-cancelled)")]
    Cancelled,

    /// The shared operation was force-cancelled; every subscriber of that
    /// generation receives this error.
    #[error("Fetch aborted: {0}")]
    Aborted(CancelReason),
}

impl FetchError {
    /// Returns true if this error is local to one caller rather than a
    /// shared outcome of the in-flight operation.
    pub fn is_caller_local(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}
