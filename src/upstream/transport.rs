//! Transport abstraction and the default hyper client.
//!
//! # Responsibilities
//! - Execute one HTTP exchange against an origin
//! - Classify failures as connect or protocol errors
//! - Re-encrypt towards HTTPS origins with rustls

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::Request};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls::{ClientConfig, RootCertStore};

use super::UpstreamResponse;
use crate::error::BoxError;

/// Failure reported by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No connection to the origin could be established.
    #[error("connect failed: {0}")]
    Connect(#[source] BoxError),

    /// The exchange failed after connecting.
    #[error("protocol error: {0}")]
    Protocol(#[source] BoxError),
}

/// Performs a single request/response exchange with an origin.
///
/// Requests carry an absolute URI. Implementations must stream the
/// response body rather than buffer it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request<Body>) -> Result<UpstreamResponse, TransportError>;
}

/// Pooled hyper client speaking HTTP/1.1 over TCP or TLS.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HyperTransport {
    /// Build a transport trusting the webpki roots plus `extra_roots`.
    pub fn new(connect_timeout: Duration, extra_roots: Option<&Path>) -> Result<Self, std::io::Error> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = extra_roots {
            let mut reader = BufReader::new(File::open(path)?);
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?).map_err(std::io::Error::other)?;
            }
            tracing::info!(path = %path.display(), "Loaded extra upstream root certificates");
        }

        let tls = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(std::io::Error::other)?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn round_trip(&self, request: Request<Body>) -> Result<UpstreamResponse, TransportError> {
        match self.client.request(request).await {
            Ok(response) => Ok(UpstreamResponse::from(response)),
            Err(e) if e.is_connect() => Err(TransportError::Connect(Box::new(e))),
            Err(e) => Err(TransportError::Protocol(Box::new(e))),
        }
    }
}
