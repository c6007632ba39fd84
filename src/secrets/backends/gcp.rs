//! GCP Secret Manager backend implementation
//!
//! Each secret maps to `projects/{project}/secrets/{name}`. Creating a secret
//! provisions it with automatic replication and then adds the payload as its
//! first version. Version numbers are assigned by Secret Manager and parsed
//! from the trailing segment of the returned version resource name.
//!
//! ## Configuration
//!
//! - `project_id` - Required
//! - `credentials_path` - Service account key file; falls back to
//!   `GOOGLE_APPLICATION_CREDENTIALS`

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

#[cfg(feature = "gcp")]
use super::backend::{ensure_version, status_error, BackendCloser, SecretBackend, SecretBackendType};
#[cfg(feature = "gcp")]
use crate::secrets::types::Secret;
#[cfg(feature = "gcp")]
use async_trait::async_trait;
#[cfg(feature = "gcp")]
use tokio::sync::RwLock;
#[cfg(feature = "gcp")]
use tracing::{debug, error, info, warn};

#[cfg(feature = "gcp")]
use google_secretmanager1::api::{
    AddSecretVersionRequest, Automatic, Replication, Secret as GcpSecret, SecretPayload,
};
#[cfg(feature = "gcp")]
use google_secretmanager1::{hyper_rustls, hyper_util, SecretManager};

/// Configuration for GCP Secret Manager backend
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GcpSecretManagerConfig {
    /// GCP project ID
    #[validate(length(min = 1))]
    pub project_id: String,

    /// Service account key file
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

impl GcpSecretManagerConfig {
    /// Key file to authenticate with, from configuration or the environment.
    pub fn resolve_credentials_path(&self) -> Result<PathBuf> {
        self.credentials_path
            .clone()
            .or_else(|| std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from))
            .ok_or_else(|| {
                Error::config(
                    "GCP credentials not configured. Set credentials_path or \
                     GOOGLE_APPLICATION_CREDENTIALS",
                )
            })
    }
}

/// Parse the version number from a `.../versions/{n}` resource name.
pub fn parse_version(resource_name: &str) -> Result<u64> {
    resource_name
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<u64>().ok())
        .filter(|version| *version > 0)
        .ok_or_else(|| Error::invalid_resource_name(resource_name))
}

/// Map a Secret Manager error message onto an HTTP status.
#[cfg_attr(not(feature = "gcp"), allow(dead_code))]
fn classify_error(message: &str) -> u16 {
    if message.contains("NOT_FOUND") || message.contains("404") {
        404
    } else if message.contains("PERMISSION_DENIED") || message.contains("403") {
        403
    } else if message.contains("UNAUTHENTICATED") || message.contains("401") {
        401
    } else {
        500
    }
}

#[cfg(feature = "gcp")]
type Hub =
    SecretManager<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// GCP Secret Manager backend
///
/// Holds an HTTPS client and an authenticator until [`BackendCloser::close`]
/// releases them.
#[cfg(feature = "gcp")]
pub struct GcpSecretBackend {
    hub: RwLock<Option<Hub>>,
    project_id: String,
}

#[cfg(feature = "gcp")]
impl std::fmt::Debug for GcpSecretBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpSecretBackend")
            .field("project_id", &self.project_id)
            .field("hub", &"[SecretManager]")
            .finish()
    }
}

#[cfg(feature = "gcp")]
impl GcpSecretBackend {
    /// Create a new GCP Secret Manager backend with the given configuration
    pub async fn from_config(config: &GcpSecretManagerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(format!("Invalid GCP configuration: {}", e)))?;
        let credentials_path = config.resolve_credentials_path()?;

        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build(
                    hyper_rustls::HttpsConnectorBuilder::new()
                        .with_native_roots()
                        .map_err(|e| {
                            Error::config(format!("Failed to load native TLS roots: {}", e))
                        })?
                        .https_or_http()
                        .enable_http2()
                        .build(),
                );

        let key = yup_oauth2::read_service_account_key(&credentials_path).await.map_err(|e| {
            Error::config(format!(
                "Failed to read GCP credentials from '{}': {}",
                credentials_path.display(),
                e
            ))
        })?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| Error::config(format!("Failed to build GCP authenticator: {}", e)))?;

        info!(project_id = %config.project_id, "Initialized GCP Secret Manager backend");

        Ok(Self {
            hub: RwLock::new(Some(SecretManager::new(client, auth))),
            project_id: config.project_id.clone(),
        })
    }

    fn secret_path(&self, name: &str) -> String {
        format!("projects/{}/secrets/{}", self.project_id, name)
    }

    fn map_error(operation: &str, name: &str, e: google_secretmanager1::Error) -> Error {
        let message = e.to_string();
        error!(secret = %name, operation, error = %message, "GCP Secret Manager request failed");
        status_error(
            classify_error(&message),
            name,
            format!("gcp {} '{}': {}", operation, name, message),
        )
    }

    fn closed() -> Error {
        Error::backend_unavailable("GCP Secret Manager backend has been closed")
    }

    async fn access(&self, name: &str, version: &str) -> Result<Secret> {
        let guard = self.hub.read().await;
        let hub = guard.as_ref().ok_or_else(Self::closed)?;

        let resource_name = format!("{}/versions/{}", self.secret_path(name), version);
        debug!(secret = %name, resource_name = %resource_name, "Accessing GCP secret version");

        let (_, response) = hub
            .projects()
            .secrets_versions_access(&resource_name)
            .doit()
            .await
            .map_err(|e| Self::map_error("access", name, e))?;

        let version_name = response.name.ok_or_else(|| {
            warn!(secret = %name, "Secret version response has no name");
            Error::invalid_resource_name(resource_name.clone())
        })?;
        let payload = response.payload.and_then(|p| p.data).unwrap_or_default();

        Ok(Secret::new(name, parse_version(&version_name)?, payload))
    }
}

#[cfg(feature = "gcp")]
#[async_trait]
impl SecretBackend for GcpSecretBackend {
    async fn create_secret(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        {
            let guard = self.hub.read().await;
            let hub = guard.as_ref().ok_or_else(Self::closed)?;

            let secret = GcpSecret {
                replication: Some(Replication {
                    automatic: Some(Automatic::default()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let parent = format!("projects/{}", self.project_id);

            hub.projects()
                .secrets_create(secret, &parent)
                .secret_id(name)
                .doit()
                .await
                .map_err(|e| Self::map_error("create", name, e))?;
            info!(secret = %name, project_id = %self.project_id, "Created GCP secret");
        }

        self.add_version(name, payload).await
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        let guard = self.hub.read().await;
        let hub = guard.as_ref().ok_or_else(Self::closed)?;

        let request = AddSecretVersionRequest {
            payload: Some(SecretPayload { data: Some(payload.to_vec()), ..Default::default() }),
            ..Default::default()
        };

        let (_, version) = hub
            .projects()
            .secrets_add_version(request, &self.secret_path(name))
            .doit()
            .await
            .map_err(|e| Self::map_error("add version", name, e))?;

        let version_name =
            version.name.ok_or_else(|| Error::invalid_resource_name(self.secret_path(name)))?;
        let version = parse_version(&version_name)?;

        info!(secret = %name, version, "Added GCP secret version");
        Ok(Secret::new(name, version, payload))
    }

    async fn get_version(&self, name: &str, version: u64) -> Result<Secret> {
        ensure_version(name, version)?;
        self.access(name, &version.to_string()).await.map_err(|e| match e {
            Error::SecretNotFound { .. } => Error::version_not_found(name, version),
            other => other,
        })
    }

    async fn get_latest_version(&self, name: &str) -> Result<Secret> {
        self.access(name, "latest").await
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        let guard = self.hub.read().await;
        let hub = guard.as_ref().ok_or_else(Self::closed)?;

        hub.projects()
            .secrets_delete(&self.secret_path(name))
            .doit()
            .await
            .map_err(|e| Self::map_error("delete", name, e))?;

        info!(secret = %name, "Deleted GCP secret");
        Ok(())
    }

    fn backend_type(&self) -> SecretBackendType {
        SecretBackendType::GcpSecretManager
    }

    fn closer(&self) -> Option<&dyn BackendCloser> {
        Some(self)
    }
}

#[cfg(feature = "gcp")]
#[async_trait]
impl BackendCloser for GcpSecretBackend {
    async fn close(&self) -> Result<()> {
        if self.hub.write().await.take().is_some() {
            info!(project_id = %self.project_id, "Closed GCP Secret Manager backend");
        }
        Ok(())
    }
}

// Stub struct for non-feature builds (allows type to exist but not be constructable)
#[cfg(not(feature = "gcp"))]
#[derive(Debug)]
pub struct GcpSecretBackend {
    _private: (),
}
