//! CONNECT tunnel handling.
//!
//! # Data Flow
//! ```text
//! CONNECT host:port
//!     → Received         parse authority (400 on failure)
//!     → TargetResolved   Raw: dial origin / Intercept: issue certificate
//!                        (502 on failure, before any 200 is written)
//!     → 200 Connection Established
//!     → RawTunnel        splice.rs copies bytes both ways
//!       TlsIntercepting  intercept.rs terminates TLS, serves inner HTTP
//!     → Relaying → Closed
//! ```
//!
//! # Design Decisions
//! - Raw and intercepting tunnels are one `TunnelMode`, chosen at startup
//! - All setup that can fail happens before the 200 goes out
//! - Interception fails closed: a certificate error never falls back to a raw tunnel
//! - The tunnel runs on its own task and holds its own connection guard,
//!   since it outlives the HTTP exchange that opened it

pub mod intercept;
pub mod splice;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response, StatusCode, Uri},
    response::IntoResponse,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use rustls::sign::CertifiedKey;
use tokio::net::TcpStream;

use crate::ca::{normalize_host, CertificateCache};
use crate::error::ProxyError;
use crate::http::server::ProxyState;
use crate::observability::TunnelSummary;

/// How CONNECT requests are served.
#[derive(Clone)]
pub enum TunnelMode {
    /// Opaque byte splice to the target.
    Raw,
    /// TLS termination with certificates from the shared cache.
    Intercept(Arc<CertificateCache>),
}

impl TunnelMode {
    pub fn label(&self) -> &'static str {
        match self {
            TunnelMode::Raw => "raw",
            TunnelMode::Intercept(_) => "intercept",
        }
    }
}

impl fmt::Debug for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of one CONNECT tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Received,
    TargetResolved,
    RawTunnel,
    TlsIntercepting,
    Relaying,
    Closed,
}

impl TunnelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelState::Received => "received",
            TunnelState::TargetResolved => "target_resolved",
            TunnelState::RawTunnel => "raw_tunnel",
            TunnelState::TlsIntercepting => "tls_intercepting",
            TunnelState::Relaying => "relaying",
            TunnelState::Closed => "closed",
        }
    }
}

fn transition(target: &TunnelTarget, state: TunnelState) {
    tracing::trace!(tunnel_target = %target, state = state.as_str(), "Tunnel state");
}

/// Host and port named by a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    /// Hostname or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    const DEFAULT_PORT: u16 = 443;

    /// Read the target from a CONNECT request URI (authority-form).
    pub fn parse(uri: &Uri) -> Result<Self, ProxyError> {
        let authority = uri
            .authority()
            .ok_or_else(|| ProxyError::malformed(format!("CONNECT target {:?} is not host:port", uri.to_string())))?;

        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ProxyError::malformed("CONNECT target has an empty host"));
        }

        Ok(Self {
            host: host.to_string(),
            port: authority.port_u16().unwrap_or(Self::DEFAULT_PORT),
        })
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Everything an intercepting tunnel needs once the client has been told 200.
///
/// Built per CONNECT, so it is never shared between target hosts.
#[derive(Debug, Clone)]
pub struct TunnelContext {
    pub target: TunnelTarget,
    /// Normalized CONNECT host, the cache key for `identity`.
    pub host_key: String,
    /// Certificate presented when the client's SNI matches the CONNECT host.
    pub identity: Arc<CertifiedKey>,
    pub cache: Arc<CertificateCache>,
}

/// Handle a CONNECT request. The returned response is sent before any tunnel bytes.
pub async fn handle_connect(state: Arc<ProxyState>, mut request: Request<Body>) -> Response<Body> {
    let target = match TunnelTarget::parse(request.uri()) {
        Ok(target) => target,
        Err(e) => return reject(&state, e),
    };
    transition(&target, TunnelState::Received);

    let on_upgrade = hyper::upgrade::on(&mut request);

    match state.tunnel_mode() {
        TunnelMode::Raw => {
            let origin = match dial(&target, state.connect_timeout()).await {
                Ok(origin) => origin,
                Err(e) => return reject(&state, e),
            };
            transition(&target, TunnelState::TargetResolved);
            tokio::spawn(run_raw(Arc::clone(&state), target, origin, on_upgrade));
        }
        TunnelMode::Intercept(cache) => {
            let host_key = normalize_host(&target.host);
            let identity = match cache.issue(&host_key).await {
                Ok(identity) => identity,
                Err(source) => {
                    return reject(
                        &state,
                        ProxyError::CertificateIssuance {
                            host: target.host.clone(),
                            source,
                        },
                    )
                }
            };
            transition(&target, TunnelState::TargetResolved);
            let context = TunnelContext {
                target,
                host_key,
                identity,
                cache: Arc::clone(cache),
            };
            tokio::spawn(run_intercept(Arc::clone(&state), context, on_upgrade));
        }
    }

    connection_established()
}

fn reject(state: &ProxyState, error: ProxyError) -> Response<Body> {
    state.hooks().on_error(None, &error);
    error.into_response()
}

/// `200 Connection Established` with no body.
fn connection_established() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    response
        .extensions_mut()
        .insert(hyper::ext::ReasonPhrase::from_static(b"Connection Established"));
    response
}

/// Open the TCP connection to the tunnel target.
async fn dial(target: &TunnelTarget, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let setup_error = |source| ProxyError::TunnelSetup {
        target: target.to_string(),
        source,
    };

    let connect = TcpStream::connect((target.host.as_str(), target.port));
    let stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| setup_error(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")))?
        .map_err(setup_error)?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

async fn run_raw(state: Arc<ProxyState>, target: TunnelTarget, origin: TcpStream, on_upgrade: OnUpgrade) {
    let _guard = state.tracker().track();
    transition(&target, TunnelState::RawTunnel);

    let summary = match on_upgrade.await {
        Ok(upgraded) => {
            transition(&target, TunnelState::Relaying);
            splice::splice(TokioIo::new(upgraded), origin, &target).await
        }
        Err(e) => TunnelSummary::failed(target.to_string(), "raw", e.to_string()),
    };

    transition(&target, TunnelState::Closed);
    state.hooks().on_tunnel_closed(&summary);
}

async fn run_intercept(state: Arc<ProxyState>, context: TunnelContext, on_upgrade: OnUpgrade) {
    let _guard = state.tracker().track();
    let target = context.target.clone();
    transition(&target, TunnelState::TlsIntercepting);

    let summary = match intercept::intercept(&state, context, on_upgrade).await {
        Ok(()) => TunnelSummary {
            target: target.to_string(),
            mode: "intercept",
            client_to_origin: 0,
            origin_to_client: 0,
            error: None,
        },
        Err(e) => TunnelSummary::failed(target.to_string(), "intercept", e.to_string()),
    };

    transition(&target, TunnelState::Closed);
    state.hooks().on_tunnel_closed(&summary);
}
