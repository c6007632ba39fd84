//! Secret backend trait and types
//!
//! Defines the core interface for pluggable secret backends.

use crate::errors::{Error, Result};
use crate::secrets::types::Secret;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of secret backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackendType {
    /// GCP Secret Manager
    GcpSecretManager,
    /// Infisical
    Infisical,
    /// HashiCorp Vault KV v2
    HcpVault,
    /// Redis list with at-rest pepper encryption
    #[default]
    Redis,
}

impl SecretBackendType {
    pub const ALL: [SecretBackendType; 4] =
        [Self::GcpSecretManager, Self::Infisical, Self::HcpVault, Self::Redis];

    /// Get the configuration representation of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GcpSecretManager => "gcp_secret_manager",
            Self::Infisical => "infisical",
            Self::HcpVault => "hcp_vault",
            Self::Redis => "redis",
        }
    }
}

impl FromStr for SecretBackendType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gcp_secret_manager" | "gcp" => Ok(Self::GcpSecretManager),
            "infisical" => Ok(Self::Infisical),
            "hcp_vault" | "hcp" => Ok(Self::HcpVault),
            "redis" => Ok(Self::Redis),
            _ => Err(Error::driver_not_found(s)),
        }
    }
}

impl fmt::Display for SecretBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for secret backends
///
/// Implementations must be Send + Sync for use in async contexts. Versions
/// are 1-based and strictly increasing per name; a stored version is never
/// modified.
#[async_trait]
pub trait SecretBackend: Send + Sync + fmt::Debug {
    /// Create a secret and store `payload` as its first version.
    async fn create_secret(&self, name: &str, payload: &[u8]) -> Result<Secret>;

    /// Append a new version to an existing secret.
    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<Secret>;

    /// Fetch one exact version.
    async fn get_version(&self, name: &str, version: u64) -> Result<Secret>;

    /// Fetch the newest version.
    async fn get_latest_version(&self, name: &str) -> Result<Secret>;

    /// Remove a secret and every version of it.
    async fn delete_secret(&self, name: &str) -> Result<()>;

    /// Get the backend type identifier
    fn backend_type(&self) -> SecretBackendType;

    /// Teardown capability. Backends holding resources that must be released
    /// explicitly override this; everything else keeps the default.
    fn closer(&self) -> Option<&dyn BackendCloser> {
        None
    }
}

/// Explicit teardown for backends that hold long-lived resources.
#[async_trait]
pub trait BackendCloser: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// Version 0 never exists; reject it before any remote call.
pub(crate) fn ensure_version(name: &str, version: u64) -> Result<()> {
    if version == 0 {
        return Err(Error::version_not_found(name, version));
    }
    Ok(())
}

/// Map an HTTP status returned by a secret service onto the error taxonomy.
pub(crate) fn status_error(status: u16, name: &str, message: impl Into<String>) -> Error {
    match status {
        404 => Error::secret_not_found(name),
        401 | 403 => Error::backend_unavailable(message),
        _ => Error::backend(message),
    }
}

/// Split a secret name on its last `/` into `(path, key)`.
///
/// A name without a separator lives at the root path `/`.
pub(crate) fn split_path(name: &str) -> (String, &str) {
    match name.rsplit_once('/') {
        Some((path, key)) => {
            let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
            (path, key)
        }
        None => ("/".to_string(), name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_roundtrip() {
        for bt in SecretBackendType::ALL {
            let s = bt.as_str();
            let parsed: SecretBackendType = s.parse().unwrap();
            assert_eq!(bt, parsed);
        }
    }

    #[test]
    fn test_backend_type_display() {
        assert_eq!(SecretBackendType::GcpSecretManager.to_string(), "gcp_secret_manager");
        assert_eq!(SecretBackendType::Infisical.to_string(), "infisical");
        assert_eq!(SecretBackendType::HcpVault.to_string(), "hcp_vault");
        assert_eq!(SecretBackendType::Redis.to_string(), "redis");
    }

    #[test]
    fn test_backend_type_serialization() {
        let json = serde_json::to_string(&SecretBackendType::HcpVault).unwrap();
        assert_eq!(json, "\"hcp_vault\"");

        let parsed: SecretBackendType = serde_json::from_str("\"redis\"").unwrap();
        assert_eq!(parsed, SecretBackendType::Redis);
        assert_eq!(SecretBackendType::default(), SecretBackendType::Redis);
    }

    #[test]
    fn test_unknown_backend_type() {
        let err = "aws".parse::<SecretBackendType>().unwrap_err();
        assert!(matches!(err, Error::DriverNotFound { .. }));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("db-key"), ("/".to_string(), "db-key"));
        assert_eq!(split_path("app/db/password"), ("/app/db".to_string(), "password"));
        assert_eq!(split_path("/app/token"), ("/app".to_string(), "token"));
        assert_eq!(split_path("/root-key"), ("/".to_string(), "root-key"));
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(404, "a", "gone"), Error::SecretNotFound { .. }));
        assert!(matches!(status_error(403, "a", "denied"), Error::BackendUnavailable { .. }));
        assert!(matches!(status_error(500, "a", "boom"), Error::Backend { .. }));
    }

    #[test]
    fn test_version_zero_rejected() {
        assert!(ensure_version("a", 0).unwrap_err().is_not_found());
        assert!(ensure_version("a", 1).is_ok());
    }
}
