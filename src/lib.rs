//! # Strongbox
//!
//! Versioned secret storage over pluggable backends, and envelope encryption
//! with rotating keys kept in that storage.
//!
//! ## Architecture
//!
//! ```text
//! Crypt → KeyProvider → Vault → DriverRegistry → SecretBackend
//!                                                 ├─ GCP Secret Manager
//!                                                 ├─ Infisical
//!                                                 ├─ HashiCorp Vault (KV v2)
//!                                                 └─ Redis (pepper-encrypted lists)
//! ```
//!
//! ## Core Components
//!
//! - **DriverRegistry**: lazy, cached, single-flight construction of drivers
//! - **Vault**: façade forwarding secret operations to the configured backend
//! - **Crypt**: AES-GCM encrypt / decrypt / recrypt producing [`crypt::Capsule`]s
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strongbox::config::Settings;
//! use strongbox::crypt::{Crypt, VaultKeyProvider};
//! use strongbox::secrets::Vault;
//!
//! #[tokio::main]
//! async fn main() -> strongbox::Result<()> {
//!     let settings = Settings::from_env()?;
//!     strongbox::observability::init_logging(&settings.observability);
//!
//!     let vault = Arc::new(Vault::from_config(&settings.vault));
//!     let crypt = Crypt::new(Arc::new(VaultKeyProvider::new(vault.clone())));
//!
//!     let capsule = crypt.encrypt(b"4111 1111 1111 1111", "payments").await?;
//!     println!("{}", capsule.to_json()?);
//!
//!     vault.close().await
//! }
//! ```

pub mod config;
pub mod crypt;
pub mod driver;
pub mod errors;
pub mod observability;
pub mod secrets;

pub use config::Settings;
pub use errors::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
