//! Per-host certificate cache.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;

use super::{normalize_host, CertificateError, CertificateProvider};
use crate::observability::metrics;

/// Thread-safe cache of issued certificates keyed by hostname.
///
/// Many connection tasks read concurrently; a miss issues a certificate
/// outside of any lock and inserts it with `entry().or_insert`, so two
/// racing tasks both end up with the entry that was stored first.
pub struct CertificateCache {
    provider: Arc<dyn CertificateProvider>,
    crypto: Arc<CryptoProvider>,
    entries: DashMap<String, Arc<CertifiedKey>>,
}

impl CertificateCache {
    /// Create an empty cache in front of `provider`.
    pub fn new(provider: Arc<dyn CertificateProvider>, crypto: Arc<CryptoProvider>) -> Self {
        Self {
            provider,
            crypto,
            entries: DashMap::new(),
        }
    }

    /// Look up a cached certificate without issuing.
    pub fn get(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        self.entries
            .get(&normalize_host(host))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Return the certificate for `host`, issuing it on first use.
    pub fn get_or_issue(&self, host: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        let host = normalize_host(host);
        if let Some(entry) = self.entries.get(&host) {
            metrics::record_certificate_lookup("hit");
            return Ok(Arc::clone(entry.value()));
        }

        metrics::record_certificate_lookup("miss");
        let issued = self.provider.issue_certificate(&host)?;
        let signing_key = self.crypto.key_provider.load_private_key(issued.key)?;
        let certified = Arc::new(CertifiedKey::new(issued.cert_chain, signing_key));

        // The entry guard holds a shard lock; release it before `len()`.
        let key = Arc::clone(self.entries.entry(host).or_insert(certified).value());
        metrics::record_certificate_cache_size(self.entries.len());
        Ok(key)
    }

    /// Async form of [`get_or_issue`](Self::get_or_issue).
    ///
    /// Key generation runs on the blocking pool so it never stalls a runtime worker.
    pub async fn issue(self: &Arc<Self>, host: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        if let Some(key) = self.get(host) {
            metrics::record_certificate_lookup("hit");
            return Ok(key);
        }

        let cache = Arc::clone(self);
        let host = host.to_string();
        tokio::task::spawn_blocking(move || cache.get_or_issue(&host)).await?
    }

    /// Number of cached hosts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
