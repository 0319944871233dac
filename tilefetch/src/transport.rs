//! Transport abstraction performing the actual tile download.
//!
//! The coordinator never talks HTTP directly; it drives a [`Transport`]
//! implementation with the entry's aggregate cancellation token. This
//! abstraction allows dependency injection and easier testing by enabling
//! mock transports in tests.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;
use crate::key::TileFormat;
use crate::response::FetchResponse;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single-call async download operation.
///
/// Implementations must honor the supplied cancellation token by aborting
/// promptly once it fires; the coordinator relies on this to enforce
/// timeouts and all-callers-withdrew cancellation.
pub trait Transport: Send + Sync {
    /// Fetch the resource at `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - Fully resolved request URL
    /// * `format` - Requested image format (content negotiation)
    /// * `cancel` - Aggregate cancellation signal for the shared operation
    ///
    /// # Returns
    ///
    /// The response, or [`TransportError::Aborted`] if `cancel` fired first.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        format: TileFormat,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>>;
}

/// Default transport implementation using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default client configuration.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        format: TileFormat,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        Box::pin(async move {
            let request = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, format.mime())
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(url, "Transport aborted before response headers");
                    return Err(TransportError::Aborted);
                }
                result = request => result.map_err(|e| TransportError::Network(e.to_string()))?,
            };

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(url, "Transport aborted while reading body");
                    return Err(TransportError::Aborted);
                }
                body = response.bytes() => {
                    body.map_err(|e| TransportError::Network(e.to_string()))?
                }
            };

            let mut fetched = FetchResponse::new(body);
            if let Some(content_type) = content_type {
                fetched = fetched.with_content_type(content_type);
            }
            Ok(fetched)
        })
    }
}
