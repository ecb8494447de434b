//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{InterceptionMode, ProxyConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub intercept: bool,
}

impl ConfigOverrides {
    /// Apply to `config`, then validate again since checks depend on the overridden fields.
    pub fn apply(self, mut config: ProxyConfig) -> Result<ProxyConfig, ConfigError> {
        if let Some(bind_address) = self.bind_address {
            config.listener.bind_address = bind_address;
        }
        if self.intercept {
            config.interception.mode = InterceptionMode::Intercept;
        }
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}
