//! Error taxonomy for the relay.
//!
//! # Design Decisions
//! - Every error is local to one connection or request
//! - Each variant maps to exactly one client-facing status code
//! - Errors raised after `200 Connection Established` never reach the client

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};

use crate::ca::CertificateError;

/// Boxed error from the underlying transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single dispatch attempt against the origin.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The origin could not be reached.
    #[error("could not connect to origin: {0}")]
    ConnectFailed(#[source] BoxError),

    /// No response head arrived within the dispatch deadline.
    #[error("origin did not respond within {0:?}")]
    Timeout(Duration),

    /// The origin answered with something that is not valid HTTP.
    #[error("malformed upstream response: {0}")]
    ProtocolError(#[source] BoxError),
}

impl DispatchError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::ConnectFailed(_) => "connect_failed",
            DispatchError::Timeout(_) => "timeout",
            DispatchError::ProtocolError(_) => "protocol_error",
        }
    }
}

/// Errors surfaced by the relay to a single client.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Bad method or request target. No upstream contact is attempted.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The CONNECT target could not be resolved or reached.
    #[error("tunnel setup to {target} failed: {source}")]
    TunnelSetup {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Interception cannot proceed for this host.
    #[error("certificate issuance for {host} failed: {source}")]
    CertificateIssuance {
        host: String,
        #[source]
        source: CertificateError,
    },
}

impl ProxyError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ProxyError::MalformedRequest(reason.into())
    }

    /// Status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Dispatch(DispatchError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Dispatch(_) => StatusCode::BAD_GATEWAY,
            ProxyError::TunnelSetup { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::CertificateIssuance { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MalformedRequest(_) => "malformed_request",
            ProxyError::Dispatch(e) => e.kind(),
            ProxyError::TunnelSetup { .. } => "tunnel_setup",
            ProxyError::CertificateIssuance { .. } => "certificate_issuance",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let mut response = Response::new(Body::from(format!("{}\n", self)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        // The client connection may still carry a half-read request body.
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ProxyError::malformed("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProxyError::from(DispatchError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::from(DispatchError::ConnectFailed("refused".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::from(DispatchError::ProtocolError("garbage".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        let tunnel = ProxyError::TunnelSetup {
            target: "example.test:443".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(tunnel.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn error_response_is_well_formed() {
        let response = ProxyError::malformed("missing host").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONNECTION], "close");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"malformed request: missing host\n");
    }
}
