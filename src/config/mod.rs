//! # Configuration Management
//!
//! Serde-deserializable settings validated with `validator`. Backend
//! sections are defined next to the backends that consume them and are
//! aggregated here under [`VaultConfig`].

pub mod settings;

pub use settings::{ObservabilityConfig, Settings, VaultConfig, ENV_PREFIX, ENV_SEPARATOR};
