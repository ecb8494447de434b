//! Upstream dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! OutboundRequest
//!     → dispatcher.rs (single attempt, deadline on the response head)
//!     → transport.rs (pluggable; default is a pooled hyper client with rustls)
//!     → UpstreamResponse (head + unread streaming body)
//! ```
//!
//! # Design Decisions
//! - No retries: proxied requests are not known to be idempotent
//! - Bodies are never buffered; the response carries the live stream
//! - Connection pooling belongs to the transport, not the relay

pub mod dispatcher;
pub mod transport;

use axum::{
    body::{Body, Bytes, HttpBody},
    http::{HeaderMap, Response, StatusCode, Version},
};

pub use dispatcher::Dispatcher;
pub use transport::{HyperTransport, Transport, TransportError};

/// Response head and body received from the origin.
///
/// The body is owned here and released exactly once: when it is fully
/// relayed, when reading it fails, or when this value is dropped.
pub struct UpstreamResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Body,
}

impl UpstreamResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Body) {
        (self.status, self.headers, self.body)
    }
}

impl<B> From<Response<B>> for UpstreamResponse
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn from(response: Response<B>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body: Body::new(body),
        }
    }
}
