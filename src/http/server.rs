//! HTTP server setup and the proxy request path.
//!
//! # Responsibilities
//! - Accept client connections and serve HTTP/1.1 on each
//! - Route CONNECT to the tunnel handler, everything else to the relay
//! - Run sanitize → dispatch → relay for each forwarded request
//! - Stop accepting on shutdown and drain live connections
//!
//! # Design Decisions
//! - One hyper connection per client socket, upgrades enabled for CONNECT
//! - The same router serves plain connections and intercepted TLS sessions;
//!   only the base URL for origin-form targets differs
//! - Shared state is an explicitly constructed `ProxyState`, no globals

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, Response},
    response::IntoResponse,
    Router,
};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tower_http::trace::TraceLayer;
use url::Url;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::http::request::{sanitize, InboundRequest};
use crate::http::response::relay_response;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::Hooks;
use crate::tunnel::{self, TunnelMode};
use crate::upstream::Dispatcher;

/// Everything a connection task needs, built once at startup.
pub struct ProxyState {
    dispatcher: Dispatcher,
    hooks: Hooks,
    tunnel_mode: TunnelMode,
    connect_timeout: Duration,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

impl ProxyState {
    pub fn new(dispatcher: Dispatcher, hooks: Hooks, tunnel_mode: TunnelMode, connect_timeout: Duration) -> Self {
        Self {
            dispatcher,
            hooks,
            tunnel_mode,
            connect_timeout,
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn tunnel_mode(&self) -> &TunnelMode {
        &self.tunnel_mode
    }

    /// Connect timeout for raw tunnel targets.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

#[derive(Clone)]
struct ConnectionState {
    proxy: Arc<ProxyState>,
    /// `https://host:port/` inside an intercepted tunnel.
    base: Option<Arc<Url>>,
}

/// Build the per-connection router. Every method and path hits the proxy handler.
pub fn build_router(proxy: Arc<ProxyState>, base: Option<Arc<Url>>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(ConnectionState { proxy, base })
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                request_id = %Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
}

/// Serve HTTP/1.1 on one client stream until it closes.
///
/// On shutdown the connection finishes its in-flight exchange and closes.
pub async fn serve_connection<I>(proxy: Arc<ProxyState>, io: I, base: Option<Arc<Url>>) -> Result<(), hyper::Error>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut signal = proxy.shutdown().subscribe();
    let service = TowerToHyperService::new(build_router(proxy, base));

    let connection = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => return result,
        _ = signal.recv() => connection.as_mut().graceful_shutdown(),
    }
    connection.await
}

async fn proxy_handler(State(conn): State<ConnectionState>, request: Request<Body>) -> Response<Body> {
    if request.method() == Method::CONNECT {
        return tunnel::handle_connect(Arc::clone(&conn.proxy), request).await;
    }
    relay(&conn.proxy, conn.base.as_deref(), request).await
}

/// Forward one non-CONNECT request and relay the origin's answer.
pub async fn relay(proxy: &ProxyState, base: Option<&Url>, request: InboundRequest) -> Response<Body> {
    let hooks = proxy.hooks();

    let outbound = match sanitize(request, base) {
        Ok(outbound) => outbound,
        Err(e) => {
            hooks.on_error(None, &e);
            return e.into_response();
        }
    };

    let summary = outbound.summary();
    hooks.on_request(&outbound);

    match proxy.dispatcher().dispatch(outbound).await {
        Ok(upstream) => {
            hooks.on_response(&summary, &upstream);
            relay_response(upstream, summary, hooks.clone())
        }
        Err(e) => {
            let error = ProxyError::from(e);
            hooks.on_error(Some(&summary), &error);
            error.into_response()
        }
    }
}

/// Client-facing proxy server.
pub struct ProxyServer {
    state: Arc<ProxyState>,
    tls: Option<TlsAcceptor>,
}

impl ProxyServer {
    pub fn new(state: ProxyState, tls: Option<TlsAcceptor>) -> Self {
        Self {
            state: Arc::new(state),
            tls,
        }
    }

    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    /// Accept connections until shutdown, then drain for at most `drain_timeout`.
    pub async fn run(self, listener: Listener, drain_timeout: Duration) -> Result<(), ListenerError> {
        let mut signal = self.state.shutdown().subscribe();
        tracing::info!(
            address = ?listener.local_addr().ok(),
            tunnel_mode = self.state.tunnel_mode().label(),
            tls = self.tls.is_some(),
            "Proxy server starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let state = Arc::clone(&self.state);
                        let tls = self.tls.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_client(state, tls, stream, peer).await;
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        // Back off briefly; errors like EMFILE repeat immediately.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => return Err(e),
                },
                _ = signal.recv() => break,
            }
        }

        drop(listener);
        let active = self.state.tracker().active_count();
        tracing::info!(active_connections = active, "Stopped accepting, draining connections");

        if self.state.tracker().wait_for_idle(drain_timeout).await {
            tracing::info!("Proxy server stopped");
        } else {
            tracing::warn!(
                active_connections = self.state.tracker().active_count(),
                "Drain timeout elapsed, abandoning connections"
            );
        }
        Ok(())
    }
}

async fn handle_client(state: Arc<ProxyState>, tls: Option<TlsAcceptor>, stream: tokio::net::TcpStream, peer: SocketAddr) {
    let guard = state.tracker().track();

    let result = match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_connection(Arc::clone(&state), stream, None).await,
            Err(e) => {
                tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Client TLS handshake failed");
                return;
            }
        },
        None => serve_connection(Arc::clone(&state), stream, None).await,
    };

    if let Err(e) = result {
        tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection ended with error");
    }
}
