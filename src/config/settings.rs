//! # Configuration Settings
//!
//! Defines the configuration structure for strongbox and how it is loaded.
//!
//! Settings come from an optional file followed by environment variables
//! prefixed with `STRONGBOX`, using `__` to separate nested keys:
//!
//! ```text
//! STRONGBOX__VAULT__DRIVER=hcp_vault
//! STRONGBOX__VAULT__HCP_VAULT__ADDRESS=https://vault.internal:8200
//! STRONGBOX__OBSERVABILITY__JSON_LOGGING=true
//! ```

use crate::errors::{Error, Result};
use crate::secrets::backends::{
    GcpSecretManagerConfig, HcpVaultConfig, InfisicalConfig, RedisConfig, SecretBackendType,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "STRONGBOX";

/// Separator between the prefix and nested keys in environment variables.
pub const ENV_SEPARATOR: &str = "__";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Settings {
    /// Secret storage configuration
    #[serde(default)]
    #[validate(nested)]
    pub vault: VaultConfig,

    /// Logging configuration
    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Load settings from `path` (when given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!(error = %e, "No .env file loaded");
        }
        Self::load(None)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        EnvFilter::try_new(&self.observability.log_level).map_err(|e| {
            Error::config(format!(
                "Invalid log level '{}': {}",
                self.observability.log_level, e
            ))
        })?;
        Ok(())
    }
}

/// Secret storage configuration
///
/// Only the section for `driver` has to be present. Sections for other
/// backends are used when a caller selects that backend explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct VaultConfig {
    /// Backend used by [`Vault`](crate::secrets::Vault) operations
    #[serde(default)]
    pub driver: SecretBackendType,

    #[serde(default)]
    #[validate(nested)]
    pub gcp_secret_manager: Option<GcpSecretManagerConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub infisical: Option<InfisicalConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub hcp_vault: Option<HcpVaultConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub redis: Option<RedisConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_logging: bool,

    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            service_name: "strongbox".to_string(),
        }
    }
}
