//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the upstream transport, certificate authority and hooks from config
//! - Bind the listener last, so traffic only arrives once everything is ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;

use tokio_rustls::TlsAcceptor;

use crate::ca::{CertificateCache, CertificateError, CertificateProvider, RcgenAuthority};
use crate::config::{InterceptionConfig, InterceptionMode, ProxyConfig};
use crate::http::server::{ProxyServer, ProxyState};
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{crypto_provider, load_tls_acceptor};
use crate::observability::{Hooks, LoggingObserver, MetricsObserver, Observer};
use crate::tunnel::TunnelMode;
use crate::upstream::{Dispatcher, HyperTransport};

/// Unrecoverable errors raised before the proxy starts serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("upstream transport: {0}")]
    Transport(#[source] std::io::Error),

    #[error("listener TLS: {0}")]
    ListenerTls(#[source] std::io::Error),

    #[error("interception CA: {0}")]
    Authority(#[from] CertificateError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Observers selected by the observability settings.
pub fn build_hooks(config: &ProxyConfig) -> Hooks {
    let mut observers: Vec<Arc<dyn Observer>> = Vec::new();
    if config.observability.log_summaries {
        observers.push(Arc::new(LoggingObserver));
    }
    if config.observability.metrics_enabled {
        observers.push(Arc::new(MetricsObserver));
    }
    Hooks::new(observers)
}

/// Load the configured CA, or generate one for this process.
pub fn load_authority(config: &InterceptionConfig) -> Result<RcgenAuthority, CertificateError> {
    let authority = match (&config.ca_cert_path, &config.ca_key_path) {
        (Some(cert), Some(key)) => RcgenAuthority::load(cert, key)?,
        _ => {
            let authority = RcgenAuthority::generate(&config.ca_common_name)?;
            tracing::warn!(
                common_name = %config.ca_common_name,
                "Generated ephemeral interception CA; clients must trust it to connect"
            );
            authority
        }
    };

    if let Some(path) = &config.ca_export_path {
        std::fs::write(path, authority.ca_cert_pem()).map_err(|source| CertificateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Wrote interception CA certificate");
    }
    Ok(authority)
}

/// Build the tunnel mode selected by config.
pub fn build_tunnel_mode(config: &InterceptionConfig) -> Result<TunnelMode, CertificateError> {
    match config.mode {
        InterceptionMode::Tunnel => Ok(TunnelMode::Raw),
        InterceptionMode::Intercept => {
            let provider: Arc<dyn CertificateProvider> = Arc::new(load_authority(config)?);
            Ok(TunnelMode::Intercept(Arc::new(CertificateCache::new(provider, crypto_provider()))))
        }
    }
}

/// Assemble the shared proxy state from a validated config.
pub fn build_state(config: &ProxyConfig) -> Result<ProxyState, StartupError> {
    let transport = HyperTransport::new(config.timeouts.connect(), config.upstream.extra_root_ca_path.as_deref())
        .map_err(StartupError::Transport)?;
    let dispatcher = Dispatcher::new(Arc::new(transport), config.timeouts.request());
    let tunnel_mode = build_tunnel_mode(&config.interception)?;

    Ok(ProxyState::new(
        dispatcher,
        build_hooks(config),
        tunnel_mode,
        config.timeouts.connect(),
    ))
}

/// Build the server and bind its listener.
pub async fn bind(config: &ProxyConfig) -> Result<(ProxyServer, Listener), StartupError> {
    let state = build_state(config)?;
    let tls: Option<TlsAcceptor> = match &config.listener.tls {
        Some(tls) => Some(load_tls_acceptor(&tls.cert_path, &tls.key_path).map_err(StartupError::ListenerTls)?),
        None => None,
    };

    let listener = Listener::bind(&config.listener).await?;
    Ok((ProxyServer::new(state, tls), listener))
}
