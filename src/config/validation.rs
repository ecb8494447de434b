//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Check that addresses parse and referenced files exist
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::path::Path;

use crate::config::schema::{InterceptionMode, ProxyConfig};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("interception.ca_cert_path and interception.ca_key_path must be set together")]
    IncompleteCaPair,

    #[error("{field}: file '{path}' does not exist")]
    MissingFile { field: &'static str, path: String },

    #[error("invalid log_level '{0}'")]
    InvalidLogLevel(String),
}

/// Check a parsed configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    }
    if let Some(tls) = &config.listener.tls {
        check_file(&mut errors, "listener.tls.cert_path", &tls.cert_path);
        check_file(&mut errors, "listener.tls.key_path", &tls.key_path);
    }

    let interception = &config.interception;
    match (&interception.ca_cert_path, &interception.ca_key_path) {
        (Some(cert), Some(key)) => {
            // Paths only matter when they will be loaded.
            if interception.mode == InterceptionMode::Intercept {
                check_file(&mut errors, "interception.ca_cert_path", cert);
                check_file(&mut errors, "interception.ca_key_path", key);
            }
        }
        (None, None) => {}
        _ => errors.push(ValidationError::IncompleteCaPair),
    }

    if let Some(path) = &config.upstream.extra_root_ca_path {
        check_file(&mut errors, "upstream.extra_root_ca_path", path);
    }

    for (field, value) in [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.shutdown_secs", config.timeouts.shutdown_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        errors.push(ValidationError::InvalidLogLevel(config.observability.log_level.clone()));
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_file(errors: &mut Vec<ValidationError>, field: &'static str, path: &Path) {
    if !path.is_file() {
        errors.push(ValidationError::MissingFile {
            field,
            path: path.display().to_string(),
        });
    }
}
