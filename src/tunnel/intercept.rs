//! TLS interception of CONNECT tunnels.
//!
//! # Responsibilities
//! - Terminate the client's TLS session with a certificate for the target
//! - Serve the decrypted stream as ordinary HTTP/1.1
//! - Feed every inner request through the same sanitize → dispatch → relay
//!   path, rooted at `https://host:port/`
//!
//! # Design Decisions
//! - The certificate for the CONNECT host is issued before the 200 is sent
//! - The ClientHello is read before any certificate is chosen, so a
//!   different SNI name is issued on the blocking pool, not inside rustls
//! - Inner requests always go to the CONNECT target, whatever SNI says

use std::sync::Arc;

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio_rustls::LazyConfigAcceptor;
use url::Url;

use super::TunnelContext;
use crate::ca::{normalize_host, CertificateError};
use crate::http::server::{serve_connection, ProxyState};
use crate::net::tls::crypto_provider;

/// Errors that end an intercepted tunnel after the 200 was sent.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error("connection upgrade failed: {0}")]
    Upgrade(#[source] hyper::Error),

    #[error("TLS setup failed: {0}")]
    Config(#[source] rustls::Error),

    #[error("TLS handshake with client failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("no certificate for SNI name {sni}: {source}")]
    Certificate {
        sni: String,
        #[source]
        source: CertificateError,
    },

    #[error("invalid tunnel base URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("inner HTTP session failed: {0}")]
    Http(#[source] hyper::Error),
}

/// Presents one certificate chosen before the handshake started.
#[derive(Debug)]
struct ChosenIdentity(Arc<CertifiedKey>);

impl ResolvesServerCert for ChosenIdentity {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

fn server_config(identity: Arc<CertifiedKey>) -> Result<ServerConfig, rustls::Error> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(ChosenIdentity(identity)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Certificate for a handshake: the CONNECT host's own, unless SNI names another host.
async fn identity_for(context: &TunnelContext, sni: Option<&str>) -> Result<Arc<CertifiedKey>, CertificateError> {
    match sni {
        Some(name) if normalize_host(name) != context.host_key => context.cache.issue(name).await,
        _ => Ok(Arc::clone(&context.identity)),
    }
}

/// Run an intercepted tunnel to completion.
pub async fn intercept(
    state: &Arc<ProxyState>,
    context: TunnelContext,
    on_upgrade: OnUpgrade,
) -> Result<(), InterceptError> {
    let base = Url::parse(&format!("https://{}/", context.target))?;

    let upgraded = on_upgrade.await.map_err(InterceptError::Upgrade)?;
    let start = LazyConfigAcceptor::new(Acceptor::default(), TokioIo::new(upgraded))
        .await
        .map_err(InterceptError::Handshake)?;

    let sni = start.client_hello().server_name().map(str::to_string);
    let identity = identity_for(&context, sni.as_deref())
        .await
        .map_err(|source| InterceptError::Certificate {
            sni: sni.clone().unwrap_or_default(),
            source,
        })?;
    let config = server_config(identity).map_err(InterceptError::Config)?;

    let tls = start
        .into_stream(Arc::new(config))
        .await
        .map_err(InterceptError::Handshake)?;

    tracing::debug!(
        tunnel_target = %context.target,
        sni = sni.as_deref().unwrap_or("-"),
        "Client TLS session established"
    );

    serve_connection(Arc::clone(state), tls, Some(Arc::new(base)))
        .await
        .map_err(InterceptError::Http)
}
