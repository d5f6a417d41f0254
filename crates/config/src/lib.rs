//! Configuration loading and validation for the Warden orchestrator.
//!
//! Configuration is a single TOML file handed to the daemon at startup.
//! Everything the orchestrator consults mid-flight lives in the explicit
//! [`WardenConfig`] struct passed in at construction; there is no ambient
//! environment lookup once a tick has begun.
//!
//! # Example
//!
//! ```toml
//! contact_email = "ops@example.test"
//!
//! [domains]
//! primary = "example.test"
//! include_www = true
//! api_subdomain = "api"
//!
//! [certificates]
//! renewal_threshold_days = 30
//! storage_path = "/var/lib/warden"
//! directory = "staging"
//! ```

mod model;
pub mod validate;

pub use model::{
    AcmeDirectory, CertificatesConfig, DaemonConfig, DomainsConfig, ProxyConfig, ReadinessConfig,
    RetryConfig, RuntimeConfig, WardenConfig,
};
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

use std::path::Path;

use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&content)?;
        tracing::info!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
