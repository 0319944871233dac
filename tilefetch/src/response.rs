//! Fetch response delivered to each subscriber.
//!
//! The payload is held in a [`bytes::Bytes`] buffer: the bytes are immutable
//! and the handle is reference-counted, so handing every subscriber its own
//! clone at settlement time fans the result out without copying, and no
//! subscriber can observe another's consumption.

use bytes::Bytes;

/// Result of a completed tile download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Response body.
    data: Bytes,
    /// Content type reported by the server, if any.
    content_type: Option<String>,
}

impl FetchResponse {
    /// Create a response from a payload.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
        }
    }

    /// Attach the server-reported content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Get the response body.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume the response, returning the body.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Get the content type reported by the server.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Get the payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
