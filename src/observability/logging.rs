//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Log request and response summaries for proxied traffic
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - JSON format for production, pretty format for development

use axum::http::{header, HeaderMap, HeaderName};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::hooks::{Observer, TunnelSummary};
use crate::config::{LogFormat, ObservabilityConfig};
use crate::error::ProxyError;
use crate::http::request::{OutboundRequest, RequestSummary};
use crate::upstream::UpstreamResponse;

/// Install the global tracing subscriber.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("forward_proxy={},tower_http=info", config.log_level).into());

    let (pretty, json) = match config.log_format {
        LogFormat::Pretty => (Some(fmt::layer()), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()
}

/// Logs a one-line summary of every request and response.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

impl Observer for LoggingObserver {
    fn on_request(&self, request: &OutboundRequest) {
        let headers = request.headers();
        tracing::info!(
            method = %request.method(),
            request_target = %request.request_target(),
            version = ?request.version(),
            host = header_str(headers, &header::HOST),
            user_agent = header_str(headers, &header::USER_AGENT),
            accept = header_str(headers, &header::ACCEPT),
            secure = request.is_secure(),
            "Forwarding request"
        );
    }

    fn on_response(&self, request: &RequestSummary, response: &UpstreamResponse) {
        let headers = response.headers();
        tracing::info!(
            method = %request.method,
            url = %request.url,
            version = ?response.version(),
            status = response.status().as_u16(),
            server = header_str(headers, &header::SERVER),
            date = header_str(headers, &header::DATE),
            content_type = header_str(headers, &header::CONTENT_TYPE),
            content_length = header_str(headers, &header::CONTENT_LENGTH),
            connection = header_str(headers, &header::CONNECTION),
            location = header_str(headers, &header::LOCATION),
            elapsed_ms = request.started.elapsed().as_millis() as u64,
            "Upstream response"
        );
    }

    fn on_error(&self, request: Option<&RequestSummary>, error: &ProxyError) {
        match request {
            Some(request) => tracing::warn!(
                method = %request.method,
                url = %request.url,
                kind = error.kind(),
                status = error.status().as_u16(),
                error = %error,
                "Request failed"
            ),
            None => tracing::warn!(
                kind = error.kind(),
                status = error.status().as_u16(),
                error = %error,
                "Request rejected"
            ),
        }
    }

    fn on_body_error(&self, request: &RequestSummary, error: &axum::Error) {
        tracing::warn!(
            method = %request.method,
            url = %request.url,
            error = %error,
            "Upstream body failed mid-stream, client response truncated"
        );
    }

    fn on_tunnel_closed(&self, summary: &TunnelSummary) {
        tracing::info!(
            tunnel_target = %summary.target,
            mode = summary.mode,
            client_to_origin = summary.client_to_origin,
            origin_to_client = summary.origin_to_client,
            error = summary.error.as_deref().unwrap_or(""),
            "Tunnel closed"
        );
    }
}
