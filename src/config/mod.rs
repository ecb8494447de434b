//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, again after CLI overrides)
//!     → ProxyConfig (validated, immutable)
//!     → consumed once by lifecycle::startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError, ConfigOverrides};
pub use schema::{
    InterceptionConfig, InterceptionMode, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    TimeoutConfig, TlsConfig, UpstreamConfig,
};
pub use validation::ValidationError;
