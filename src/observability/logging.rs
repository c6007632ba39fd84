//! # Structured Logging
//!
//! Installs a `tracing-subscriber` formatter for the process. The filter
//! comes from `RUST_LOG` when set and from
//! [`ObservabilityConfig::log_level`] otherwise.

use crate::config::{ObservabilityConfig, Settings};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`.
///
/// Returns `false` when a subscriber was already installed (for example by
/// an embedding application or a test harness); that is not an error.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logging {
        builder.json().with_current_span(true).try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(
            service_name = %config.service_name,
            log_level = %config.log_level,
            json = config.json_logging,
            "Logging initialized"
        );
    }
    installed
}

/// Log configuration at startup
pub fn log_config_info(settings: &Settings) {
    let vault = &settings.vault;
    tracing::info!(
        service_name = %settings.observability.service_name,
        driver = %vault.driver,
        gcp_secret_manager = vault.gcp_secret_manager.is_some(),
        infisical = vault.infisical.is_some(),
        hcp_vault = vault.hcp_vault.is_some(),
        redis = vault.redis.is_some(),
        "strongbox configuration"
    );
}
