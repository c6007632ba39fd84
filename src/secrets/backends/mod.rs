//! Pluggable secret backend architecture
//!
//! Every backend stores named, versioned, append-only secrets behind the
//! [`SecretBackend`] trait.
//!
//! ## Supported Backends
//!
//! - **GCP Secret Manager**: (Optional feature `gcp`)
//! - **Infisical**: REST API with universal or GCP identity auth
//! - **HashiCorp Vault**: KV v2 engine with token or GCP auth
//! - **Redis**: one list per secret, payloads sealed with a pepper key

pub mod backend;
pub mod cache;
pub mod gcp;
pub mod gcp_identity;
pub mod hcp_vault;
pub mod infisical;

pub use backend::{BackendCloser, SecretBackend, SecretBackendType};
pub use cache::{CacheSecretBackend, ListStore, MemoryListStore, RedisConfig, RedisListStore};
pub use gcp::{GcpSecretBackend, GcpSecretManagerConfig};
pub use hcp_vault::{HcpVaultConfig, HcpVaultSecretBackend};
pub use infisical::{InfisicalConfig, InfisicalSecretBackend};
