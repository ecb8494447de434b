//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): forwarded requests by method, status
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_errors_total` (counter): failed requests by error kind
//! - `proxy_body_errors_total` (counter): upstream bodies that failed mid-stream
//! - `proxy_tunnels_total` (counter): closed CONNECT tunnels by mode, outcome
//! - `proxy_tunnel_bytes_total` (counter): bytes spliced by direction
//! - `proxy_certificate_lookups_total` (counter): cache hits and misses
//! - `proxy_certificate_cache_size` (gauge): cached hosts
//! - `proxy_active_connections` (gauge): client connections in flight

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use super::hooks::{Observer, TunnelSummary};
use crate::error::ProxyError;
use crate::http::request::RequestSummary;
use crate::upstream::UpstreamResponse;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a relayed response head.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_error(kind: &'static str) {
    counter!("proxy_errors_total", "kind" => kind).increment(1);
}

pub fn record_body_error() {
    counter!("proxy_body_errors_total").increment(1);
}

pub fn record_tunnel(summary: &TunnelSummary) {
    let outcome = if summary.error.is_some() { "error" } else { "ok" };
    counter!("proxy_tunnels_total", "mode" => summary.mode, "outcome" => outcome).increment(1);
    counter!("proxy_tunnel_bytes_total", "direction" => "client_to_origin")
        .increment(summary.client_to_origin);
    counter!("proxy_tunnel_bytes_total", "direction" => "origin_to_client")
        .increment(summary.origin_to_client);
}

pub fn record_certificate_lookup(result: &'static str) {
    counter!("proxy_certificate_lookups_total", "result" => result).increment(1);
}

pub fn record_certificate_cache_size(size: usize) {
    gauge!("proxy_certificate_cache_size").set(size as f64);
}

pub fn record_active_connections(count: u64) {
    gauge!("proxy_active_connections").set(count as f64);
}

/// Feeds observer callbacks into the metrics above.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl Observer for MetricsObserver {
    fn on_response(&self, request: &RequestSummary, response: &UpstreamResponse) {
        record_request(request.method.as_str(), response.status().as_u16(), request.started);
    }

    fn on_error(&self, _request: Option<&RequestSummary>, error: &ProxyError) {
        record_error(error.kind());
    }

    fn on_body_error(&self, _request: &RequestSummary, _error: &axum::Error) {
        record_body_error();
    }

    fn on_tunnel_closed(&self, summary: &TunnelSummary) {
        record_tunnel(summary);
    }
}
