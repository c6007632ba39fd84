//! HashiCorp Vault secret backend
//!
//! Stores each secret as a KV v2 entry at the secret's name within the
//! configured mount. The payload is base64 encoded under the `data` field,
//! so arbitrary bytes survive the JSON round trip. KV v2 keeps every version;
//! `delete_secret` removes the metadata and with it all versions.

use super::backend::{ensure_version, SecretBackend, SecretBackendType};
use super::gcp_identity::{
    default_iam_credentials_url, default_metadata_url, service_account_claims, sign_jwt_with_iam,
    MetadataClient,
};
use crate::errors::{Error, Result};
use crate::secrets::types::{Secret, SecretString};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};
use validator::Validate;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

const PAYLOAD_FIELD: &str = "data";
const IAM_JWT_TTL: Duration = Duration::from_secs(15 * 60);

fn default_kv_mount() -> String {
    "secret".to_string()
}

/// How the backend authenticates to Vault
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HcpVaultAuthStrategy {
    /// Static token
    #[default]
    Token,
    /// GCP auth method (GCE identity or IAM-signed JWT)
    Gcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAuthConfig {
    pub token: SecretString,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HcpVaultGcpAuthConfig {
    /// Vault role bound to the GCP identity
    pub role_name: String,
    /// When set, log in with an IAM-signed JWT for this service account
    /// instead of the GCE instance identity
    #[serde(default)]
    pub service_account_email: Option<String>,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    #[serde(default = "default_iam_credentials_url")]
    pub iam_credentials_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HcpVaultAuthConfig {
    #[serde(default)]
    pub strategy: HcpVaultAuthStrategy,
    #[serde(default)]
    pub token: Option<TokenAuthConfig>,
    #[serde(default)]
    pub gcp: Option<HcpVaultGcpAuthConfig>,
}

/// Configuration for the HashiCorp Vault backend
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HcpVaultConfig {
    /// Vault server address
    #[validate(url)]
    pub address: String,
    /// KV v2 mount path (default: "secret")
    #[serde(default = "default_kv_mount")]
    #[validate(length(min = 1))]
    pub mount_path: String,
    /// Vault namespace (for Enterprise)
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub auth: HcpVaultAuthConfig,
}

#[derive(Deserialize)]
struct GcpLoginResponse {
    auth: GcpLoginAuth,
}

#[derive(Deserialize)]
struct GcpLoginAuth {
    client_token: String,
}

/// HashiCorp Vault KV v2 secret backend
pub struct HcpVaultSecretBackend {
    client: VaultClient,
    mount_path: String,
}

impl std::fmt::Debug for HcpVaultSecretBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HcpVaultSecretBackend")
            .field("mount_path", &self.mount_path)
            .field("client", &"[VaultClient]")
            .finish()
    }
}

impl HcpVaultSecretBackend {
    /// Authenticate and create the backend
    pub async fn from_config(config: &HcpVaultConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(format!("Invalid Vault backend configuration: {}", e)))?;

        let token = authenticate(config).await?;

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.address).token(token.expose_secret());
        if let Some(ref namespace) = config.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }

        let settings = settings_builder
            .build()
            .map_err(|e| Error::config(format!("Invalid Vault backend configuration: {}", e)))?;
        let client = VaultClient::new(settings)
            .map_err(|e| Error::config(format!("Failed to create Vault client: {}", e)))?;

        info!(
            address = %config.address,
            mount = %config.mount_path,
            strategy = ?config.auth.strategy,
            "Initialized Vault secret backend"
        );

        Ok(Self { client, mount_path: config.mount_path.clone() })
    }

    /// Get the underlying Vault client
    pub fn client(&self) -> &VaultClient {
        &self.client
    }

    fn map_error(&self, operation: &str, name: &str, version: Option<u64>, e: ClientError) -> Error {
        error!(secret = %name, operation, error = %e, mount = %self.mount_path, "Vault request failed");
        match e {
            ClientError::APIError { code: 404, .. } => match version {
                Some(version) => Error::version_not_found(name, version),
                None => Error::secret_not_found(name),
            },
            ClientError::APIError { code: 401 | 403, .. } | ClientError::RestClientError { .. } => {
                Error::backend_unavailable(format!("vault {} '{}': {}", operation, name, e))
            }
            other => Error::backend(format!("vault {} '{}': {}", operation, name, other)),
        }
    }

    async fn write(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        let mut data = HashMap::new();
        data.insert(
            PAYLOAD_FIELD.to_string(),
            base64::engine::general_purpose::STANDARD.encode(payload),
        );

        let metadata = kv2::set(&self.client, &self.mount_path, name, &data)
            .await
            .map_err(|e| self.map_error("write", name, None, e))?;

        info!(secret = %name, version = metadata.version, "Wrote secret version to Vault");
        Ok(Secret::new(name, metadata.version, payload))
    }

    async fn read(&self, name: &str, version: u64) -> Result<Secret> {
        let data: HashMap<String, String> =
            kv2::read_version(&self.client, &self.mount_path, name, version)
                .await
                .map_err(|e| self.map_error("read", name, Some(version), e))?;

        let encoded = data.get(PAYLOAD_FIELD).ok_or_else(|| {
            Error::backend(format!("vault secret '{}' has no '{}' field", name, PAYLOAD_FIELD))
        })?;
        let payload = base64::engine::general_purpose::STANDARD.decode(encoded).map_err(|e| {
            Error::backend(format!("vault secret '{}' payload is not base64: {}", name, e))
        })?;

        Ok(Secret::new(name, version, payload))
    }
}

#[async_trait]
impl SecretBackend for HcpVaultSecretBackend {
    async fn create_secret(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.write(name, payload).await
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.write(name, payload).await
    }

    async fn get_version(&self, name: &str, version: u64) -> Result<Secret> {
        ensure_version(name, version)?;
        debug!(secret = %name, version, mount = %self.mount_path, "Reading secret version from Vault");
        self.read(name, version).await
    }

    async fn get_latest_version(&self, name: &str) -> Result<Secret> {
        debug!(secret = %name, mount = %self.mount_path, "Reading latest secret version from Vault");

        let metadata = kv2::read_metadata(&self.client, &self.mount_path, name)
            .await
            .map_err(|e| self.map_error("read metadata", name, None, e))?;
        if metadata.current_version == 0 {
            return Err(Error::secret_not_found(name));
        }

        self.read(name, metadata.current_version).await
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        kv2::read_metadata(&self.client, &self.mount_path, name)
            .await
            .map_err(|e| self.map_error("read metadata", name, None, e))?;
        kv2::delete_metadata(&self.client, &self.mount_path, name)
            .await
            .map_err(|e| self.map_error("delete", name, None, e))?;

        info!(secret = %name, "Deleted secret from Vault");
        Ok(())
    }

    fn backend_type(&self) -> SecretBackendType {
        SecretBackendType::HcpVault
    }
}

/// Obtain a Vault token for the configured strategy.
async fn authenticate(config: &HcpVaultConfig) -> Result<SecretString> {
    match config.auth.strategy {
        HcpVaultAuthStrategy::Token => {
            let token = config.auth.token.as_ref().ok_or_else(|| {
                Error::config("token auth strategy requires auth.token configuration")
            })?;
            if token.token.is_empty() {
                return Err(Error::config("Vault token must not be empty"));
            }
            Ok(token.token.clone())
        }
        HcpVaultAuthStrategy::Gcp => {
            let gcp = config.auth.gcp.as_ref().ok_or_else(|| {
                Error::config("GCP auth strategy requires auth.gcp configuration")
            })?;
            gcp_login(config, gcp).await
        }
    }
}

async fn gcp_login(config: &HcpVaultConfig, gcp: &HcpVaultGcpAuthConfig) -> Result<SecretString> {
    let http = reqwest::Client::new();
    let metadata = MetadataClient::new(http.clone(), gcp.metadata_url.clone());

    let jwt = match gcp.service_account_email {
        Some(ref email) => {
            let access_token = metadata.access_token().await?;
            let claims =
                service_account_claims(email, &format!("vault/{}", gcp.role_name), IAM_JWT_TTL);
            sign_jwt_with_iam(&http, &gcp.iam_credentials_url, &access_token, email, &claims)
                .await?
        }
        None => metadata.identity_token(&format!("http://vault/{}", gcp.role_name)).await?,
    };

    let url = format!("{}/v1/auth/gcp/login", config.address.trim_end_matches('/'));
    let mut request = http
        .post(&url)
        .json(&serde_json::json!({ "role": gcp.role_name, "jwt": jwt.expose_secret() }));
    if let Some(ref namespace) = config.namespace {
        request = request.header("X-Vault-Namespace", namespace);
    }

    debug!(role = %gcp.role_name, "Logging in to Vault with GCP auth");
    let response = request.send().await.map_err(|e| {
        Error::backend_unavailable(format!("Failed to reach Vault at {}: {}", config.address, e))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), role = %gcp.role_name, "Vault GCP login rejected");
        return Err(Error::backend_unavailable(format!(
            "unable to login to GCP auth method: status {}: {}",
            status, body
        )));
    }

    let login: GcpLoginResponse = response.json().await.map_err(|e| {
        Error::backend_unavailable(format!("login response did not return client token: {}", e))
    })?;
    Ok(SecretString::new(login.auth.client_token))
}
