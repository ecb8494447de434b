//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Crypto provider used for every rustls config the proxy builds.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Load a TLS acceptor for the client-facing listener from PEM files.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, std::io::Error> {
    let open = |path: &Path| {
        File::open(path).map(BufReader::new).map_err(|e| {
            std::io::Error::new(e.kind(), format!("cannot open {}: {}", path.display(), e))
        })
    };

    let certs = rustls_pemfile::certs(&mut open(cert_path)?).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("no certificates in {}", cert_path.display()),
        ));
    }
    let key = rustls_pemfile::private_key(&mut open(key_path)?)?.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("no private key in {}", key_path.display()),
        )
    })?;

    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(std::io::Error::other)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(std::io::Error::other)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::info!(cert_path = %cert_path.display(), "Loaded listener TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_pem_certificate_and_key() {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();

        assert!(load_tls_acceptor(&cert_path, &key_path).is_ok());
    }

    #[test]
    fn empty_certificate_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, "").unwrap();
        std::fs::write(&key_path, "").unwrap();

        let err = load_tls_acceptor(&cert_path, &key_path).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn missing_key_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_acceptor(&dir.path().join("a.pem"), &dir.path().join("b.pem"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
