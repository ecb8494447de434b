//! Observer hooks invoked around upstream dispatch.

use std::sync::Arc;

use crate::error::ProxyError;
use crate::http::request::{OutboundRequest, RequestSummary};
use crate::upstream::UpstreamResponse;

/// Outcome of a finished CONNECT tunnel.
#[derive(Debug, Clone)]
pub struct TunnelSummary {
    /// CONNECT target as `host:port`.
    pub target: String,
    /// `"raw"` or `"intercept"`.
    pub mode: &'static str,
    pub client_to_origin: u64,
    pub origin_to_client: u64,
    /// Fatal I/O error that ended the tunnel, if any.
    pub error: Option<String>,
}

impl TunnelSummary {
    /// A tunnel that ended on an error before relaying anything.
    pub fn failed(target: String, mode: &'static str, error: String) -> Self {
        Self {
            target,
            mode,
            client_to_origin: 0,
            origin_to_client: 0,
            error: Some(error),
        }
    }
}

/// Read-only diagnostics callbacks.
///
/// Called synchronously on the connection task, so implementations
/// must not block. All methods default to doing nothing.
pub trait Observer: Send + Sync {
    /// A sanitized request is about to be dispatched.
    fn on_request(&self, _request: &OutboundRequest) {}

    /// The origin answered; the body has not been read yet.
    fn on_response(&self, _request: &RequestSummary, _response: &UpstreamResponse) {}

    /// The request failed before a response head could be relayed.
    fn on_error(&self, _request: Option<&RequestSummary>, _error: &ProxyError) {}

    /// The upstream body failed mid-stream; the client sees a truncated body.
    fn on_body_error(&self, _request: &RequestSummary, _error: &axum::Error) {}

    /// A CONNECT tunnel has closed.
    fn on_tunnel_closed(&self, _summary: &TunnelSummary) {}
}

/// Ordered set of observers shared by every connection.
#[derive(Clone, Default)]
pub struct Hooks {
    observers: Arc<Vec<Arc<dyn Observer>>>,
}

impl Hooks {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self {
            observers: Arc::new(observers),
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn on_request(&self, request: &OutboundRequest) {
        for observer in self.observers.iter() {
            observer.on_request(request);
        }
    }

    pub fn on_response(&self, request: &RequestSummary, response: &UpstreamResponse) {
        for observer in self.observers.iter() {
            observer.on_response(request, response);
        }
    }

    pub fn on_error(&self, request: Option<&RequestSummary>, error: &ProxyError) {
        for observer in self.observers.iter() {
            observer.on_error(request, error);
        }
    }

    pub fn on_body_error(&self, request: &RequestSummary, error: &axum::Error) {
        for observer in self.observers.iter() {
            observer.on_body_error(request, error);
        }
    }

    pub fn on_tunnel_closed(&self, summary: &TunnelSummary) {
        for observer in self.observers.iter() {
            observer.on_tunnel_closed(summary);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every callback as a short string.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Observer for RecordingObserver {
        fn on_request(&self, request: &OutboundRequest) {
            self.events
                .lock()
                .unwrap()
                .push(format!("request {} {}", request.method(), request.target()));
        }

        fn on_response(&self, _request: &RequestSummary, response: &UpstreamResponse) {
            self.events
                .lock()
                .unwrap()
                .push(format!("response {}", response.status().as_u16()));
        }

        fn on_error(&self, _request: Option<&RequestSummary>, error: &ProxyError) {
            self.events.lock().unwrap().push(format!("error {}", error.kind()));
        }

        fn on_body_error(&self, _request: &RequestSummary, _error: &axum::Error) {
            self.events.lock().unwrap().push("body_error".to_string());
        }

        fn on_tunnel_closed(&self, summary: &TunnelSummary) {
            self.events
                .lock()
                .unwrap()
                .push(format!("tunnel {} {}", summary.mode, summary.target));
        }
    }
}
