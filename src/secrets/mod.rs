//! Versioned secret storage.
//!
//! # Architecture
//!
//! The [`Vault`] façade forwards every call to one [`SecretBackend`], picked
//! by [`SecretBackendType`] and constructed lazily through a
//! [`DriverRegistry`](crate::driver::DriverRegistry):
//!
//! - **GCP Secret Manager**: managed secret versions (feature `gcp`)
//! - **Infisical**: REST raw-secret API with universal or GCP auth
//! - **HashiCorp Vault**: KV v2 engine with token or GCP auth
//! - **Redis**: one list per secret, payloads encrypted with a pepper key
//!
//! Every secret is a sequence of immutable versions numbered from 1.
//!
//! # Example
//!
//! ```rust,ignore
//! use strongbox::config::Settings;
//! use strongbox::secrets::Vault;
//!
//! let settings = Settings::from_env()?;
//! let vault = Vault::from_config(&settings.vault);
//!
//! vault.create_secret("jwt-signing", b"v1").await?;
//! vault.add_version("jwt-signing", b"v2").await?;
//!
//! let latest = vault.get_latest_version("jwt-signing").await?;
//! assert_eq!(latest.version, 2);
//! ```
//!
//! # Security Considerations
//!
//! - Payloads are never logged or included in error messages
//! - [`Secret`] and [`SecretString`] redact their contents in `Debug`
//! - The Redis backend stores only pepper-encrypted payloads

pub mod backends;
pub mod types;
pub mod vault;

pub use backends::{BackendCloser, SecretBackend, SecretBackendType};
pub use types::{Secret, SecretString};
pub use vault::{backend_factory, BackendFactory, BackendRegistry, Vault};
