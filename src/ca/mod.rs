//! Certificate authority subsystem.
//!
//! # Data Flow
//! ```text
//! CONNECT host (or SNI name)
//!     → cache.rs (lookup by normalized hostname)
//!     → on miss: authority.rs (issue leaf signed by the proxy CA)
//!     → rustls CertifiedKey, shared via Arc with the TLS acceptor
//! ```
//!
//! # Design Decisions
//! - Issuance is behind the `CertificateProvider` trait so the relay never
//!   depends on how certificates are produced
//! - Cache lives for the whole process, no eviction
//! - Concurrent misses for one host may both issue; the first insert wins

pub mod authority;
pub mod cache;

pub use authority::{CertificateProvider, IssuedCertificate, RcgenAuthority};
pub use cache::CertificateCache;

/// Errors raised while loading the CA or issuing a leaf certificate.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("invalid hostname {0:?}")]
    InvalidHostname(String),

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("unusable private key: {0}")]
    Key(#[from] rustls::Error),

    #[error("issuance task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Normalize a hostname into its cache key form.
///
/// Lowercases, drops a trailing root dot and IPv6 brackets.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.trim_end_matches('.').to_ascii_lowercase()
}
