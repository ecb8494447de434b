//! Certificate issuance.
//!
//! # Responsibilities
//! - Load the proxy CA from PEM files, or generate a fresh one
//! - Issue per-host leaf certificates signed by the CA
//! - Export the CA certificate so clients can trust it

use std::fs;
use std::path::Path;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use super::CertificateError;

/// A leaf certificate chain and its private key.
pub struct IssuedCertificate {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Produces certificates the proxy can present for a given host.
pub trait CertificateProvider: Send + Sync {
    /// Issue a certificate whose subject matches `hostname`.
    fn issue_certificate(&self, hostname: &str) -> Result<IssuedCertificate, CertificateError>;
}

/// Certificate authority backed by `rcgen`.
pub struct RcgenAuthority {
    issuer: Certificate,
    issuer_key: KeyPair,
    /// PEM of the CA certificate clients are expected to trust.
    cert_pem: String,
}

impl RcgenAuthority {
    /// Generate a new self-signed CA.
    pub fn generate(common_name: &str) -> Result<Self, CertificateError> {
        let key = KeyPair::generate()?;

        let mut params = CertificateParams::default();
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, common_name);
        name.push(DnType::OrganizationName, "forward-proxy");
        params.distinguished_name = name;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let issuer = params.self_signed(&key)?;
        let cert_pem = issuer.pem();

        tracing::info!(common_name = %common_name, "Generated CA certificate");

        Ok(Self {
            issuer,
            issuer_key: key,
            cert_pem,
        })
    }

    /// Build an authority from PEM encoded CA certificate and key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertificateError> {
        let key = KeyPair::from_pem(key_pem)?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem)?;
        // Re-signing keeps the subject and key, so leaves chain to the original.
        let issuer = params.self_signed(&key)?;

        Ok(Self {
            issuer,
            issuer_key: key,
            cert_pem: cert_pem.to_string(),
        })
    }

    /// Load the CA certificate and key from disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CertificateError> {
        let cert_pem = read_pem(cert_path)?;
        let key_pem = read_pem(key_path)?;
        let authority = Self::from_pem(&cert_pem, &key_pem)?;

        tracing::info!(cert_path = %cert_path.display(), "Loaded CA certificate");
        Ok(authority)
    }

    /// PEM of the CA certificate.
    pub fn ca_cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM of the CA private key.
    pub fn ca_key_pem(&self) -> String {
        self.issuer_key.serialize_pem()
    }

    /// Write the CA certificate and key as PEM files.
    pub fn write_pem(&self, cert_path: &Path, key_path: &Path) -> Result<(), CertificateError> {
        write_pem(cert_path, self.ca_cert_pem())?;
        write_pem(key_path, &self.ca_key_pem())?;
        Ok(())
    }
}

impl CertificateProvider for RcgenAuthority {
    fn issue_certificate(&self, hostname: &str) -> Result<IssuedCertificate, CertificateError> {
        if hostname.is_empty() {
            return Err(CertificateError::InvalidHostname(hostname.to_string()));
        }

        // IP literals become IP SANs, everything else a DNS SAN.
        let mut params = CertificateParams::new(vec![hostname.to_string()])?;
        params.distinguished_name.push(DnType::CommonName, hostname);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.use_authority_key_identifier_extension = true;

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &self.issuer, &self.issuer_key)?;

        tracing::debug!(hostname = %hostname, "Issued leaf certificate");

        Ok(IssuedCertificate {
            cert_chain: vec![cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        })
    }
}

fn read_pem(path: &Path) -> Result<String, CertificateError> {
    fs::read_to_string(path).map_err(|source| CertificateError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn write_pem(path: &Path, contents: &str) -> Result<(), CertificateError> {
    fs::write(path, contents).map_err(|source| CertificateError::Io {
        path: path.display().to_string(),
        source,
    })
}
