//! Single-attempt dispatch with a deadline.

use std::sync::Arc;
use std::time::Duration;

use super::transport::{Transport, TransportError};
use super::UpstreamResponse;
use crate::error::DispatchError;
use crate::http::request::OutboundRequest;

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(e) => DispatchError::ConnectFailed(e),
            TransportError::Protocol(e) => DispatchError::ProtocolError(e),
        }
    }
}

/// Sends sanitized requests to their origin through a `Transport`.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Dispatcher {
    /// `timeout` bounds the wait for the response head of each attempt.
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Execute exactly one attempt. Never retries.
    pub async fn dispatch(&self, request: OutboundRequest) -> Result<UpstreamResponse, DispatchError> {
        let exchange = self.transport.round_trip(request.into_http());
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result.map_err(DispatchError::from),
            // Dropping the exchange future releases the upstream connection.
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        }
    }
}
