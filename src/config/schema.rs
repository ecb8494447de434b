//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Client-facing listener (bind address, limits, optional TLS).
    pub listener: ListenerConfig,

    /// How CONNECT tunnels are handled.
    pub interception: InterceptionConfig,

    /// Outbound connection settings.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:3128").
    pub bind_address: String,

    /// Optional TLS between client and proxy.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3128".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// CONNECT handling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterceptionMode {
    /// Splice bytes between client and origin without inspection.
    #[default]
    Tunnel,
    /// Terminate TLS with a per-host certificate and relay the inner requests.
    Intercept,
}

/// Interception settings.
///
/// In intercept mode without `ca_cert_path`/`ca_key_path`, an ephemeral
/// CA is generated at startup and optionally written to `ca_export_path`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InterceptionConfig {
    pub mode: InterceptionMode,
    pub ca_cert_path: Option<PathBuf>,
    pub ca_key_path: Option<PathBuf>,

    /// Common name for a generated CA.
    pub ca_common_name: String,

    /// Where to write the generated CA certificate (PEM) for clients to trust.
    pub ca_export_path: Option<PathBuf>,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            mode: InterceptionMode::Tunnel,
            ca_cert_path: None,
            ca_key_path: None,
            ca_common_name: "forward-proxy interception CA".to_string(),
            ca_export_path: None,
        }
    }
}

/// Outbound connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Extra PEM roots trusted for HTTPS origins, on top of the bundled web roots.
    pub extra_root_ca_path: Option<PathBuf>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout for origins and tunnel targets, in seconds.
    pub connect_secs: u64,

    /// Time allowed for an origin to produce its response head, in seconds.
    pub request_secs: u64,

    /// How long shutdown waits for live connections to drain, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Emit one summary line per request, response and tunnel.
    pub log_summaries: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_summaries: true,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:3128");
        assert_eq!(config.interception.mode, InterceptionMode::Tunnel);
        assert_eq!(config.timeouts.request(), Duration::from_secs(30));
        assert!(config.observability.log_summaries);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn parses_full_document() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "0.0.0.0:8080"
            max_connections = 64

            [interception]
            mode = "intercept"
            ca_cert_path = "/etc/proxy/ca.pem"
            ca_key_path = "/etc/proxy/ca.key"

            [upstream]
            extra_root_ca_path = "/etc/proxy/roots.pem"

            [timeouts]
            connect_secs = 2
            request_secs = 9

            [observability]
            log_format = "json"
            metrics_enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.max_connections, 64);
        assert_eq!(config.interception.mode, InterceptionMode::Intercept);
        assert_eq!(config.interception.ca_key_path, Some(PathBuf::from("/etc/proxy/ca.key")));
        assert!(config.upstream.extra_root_ca_path.is_some());
        assert_eq!(config.timeouts.connect(), Duration::from_secs(2));
        assert_eq!(config.timeouts.shutdown_secs, 10);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let result: Result<ProxyConfig, _> = toml::from_str("[interception]\nmode = \"sniff\"\n");
        assert!(result.is_err());
    }
}
