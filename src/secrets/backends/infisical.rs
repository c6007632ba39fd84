//! Infisical secret backend
//!
//! Talks to the Infisical REST API (raw secrets, v3). A secret name is split
//! on its last `/` into a folder path and a secret key; names without a `/`
//! live at the root folder. The login runs once at construction and its
//! access token is used for the life of the backend.
//!
//! Infisical values are text, so payloads are stored as standard base64.

use super::backend::{ensure_version, split_path, status_error, SecretBackend, SecretBackendType};
use super::gcp_identity::{default_metadata_url, MetadataClient, ServiceAccountKey};
use crate::errors::{Error, Result};
use crate::secrets::types::{Secret, SecretString};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};
use validator::Validate;

const SECRET_TYPE: &str = "shared";
const IAM_JWT_TTL: Duration = Duration::from_secs(15 * 60);

/// How the backend logs in to Infisical
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfisicalAuthStrategy {
    /// Machine identity client id / secret
    #[default]
    Universal,
    /// GCE metadata identity token
    GcpIdToken,
    /// JWT signed with a service account key file
    GcpIam,
}

/// Universal auth credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// GCP auth settings shared by the `gcp_id_token` and `gcp_iam` strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfisicalGcpAuthConfig {
    pub identity_id: String,
    /// Required for `gcp_iam`
    #[serde(default)]
    pub service_account_key_file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfisicalAuthConfig {
    #[serde(default)]
    pub strategy: InfisicalAuthStrategy,
    #[serde(default)]
    pub universal: Option<UniversalAuthConfig>,
    #[serde(default)]
    pub gcp: Option<InfisicalGcpAuthConfig>,
}

/// Configuration for the Infisical backend
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InfisicalConfig {
    /// Infisical instance, e.g. `https://app.infisical.com`
    #[validate(url)]
    pub site_url: String,
    /// Project (workspace) id
    #[validate(length(min = 1))]
    pub project_id: String,
    /// Environment slug, e.g. `prod`
    #[validate(length(min = 1))]
    pub environment: String,
    #[serde(default)]
    pub auth: InfisicalAuthConfig,
    /// GCE metadata server used by `gcp_id_token`
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretEnvelope {
    secret: RawSecret,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSecret {
    #[serde(default)]
    secret_value: String,
    version: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteSecretRequest<'a> {
    workspace_id: &'a str,
    environment: &'a str,
    secret_path: &'a str,
    #[serde(rename = "type")]
    secret_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_value: Option<&'a str>,
}

/// Infisical secret backend
#[derive(Debug)]
pub struct InfisicalSecretBackend {
    http: reqwest::Client,
    site_url: String,
    project_id: String,
    environment: String,
    access_token: SecretString,
}

impl InfisicalSecretBackend {
    /// Validate configuration and log in.
    pub async fn from_config(config: &InfisicalConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(format!("Invalid infisical configuration: {}", e)))?;

        let http = reqwest::Client::new();
        let site_url = config.site_url.trim_end_matches('/').to_string();
        let access_token = login(&http, &site_url, config).await?;

        info!(
            site_url = %site_url,
            project_id = %config.project_id,
            environment = %config.environment,
            strategy = ?config.auth.strategy,
            "Infisical secret backend initialized"
        );

        Ok(Self {
            http,
            site_url,
            project_id: config.project_id.clone(),
            environment: config.environment.clone(),
            access_token,
        })
    }

    fn secret_url(&self, key: &str) -> String {
        format!("{}/api/v3/secrets/raw/{}", self.site_url, key)
    }

    async fn send(
        &self,
        name: &str,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response =
            request.bearer_auth(self.access_token.expose_secret()).send().await.map_err(|e| {
                error!(error = %e, secret = %name, operation, "Infisical request failed");
                Error::backend_unavailable(format!("infisical {} '{}': {}", operation, name, e))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), secret = %name, operation, "Infisical rejected request");
        Err(status_error(
            status.as_u16(),
            name,
            format!("infisical {} '{}' failed with status {}: {}", operation, name, status, body),
        ))
    }

    async fn write(
        &self,
        name: &str,
        operation: &str,
        method: reqwest::Method,
        payload: &[u8],
    ) -> Result<Secret> {
        let value = base64::engine::general_purpose::STANDARD.encode(payload);
        let (path, key) = split_path(name);
        let body = WriteSecretRequest {
            workspace_id: &self.project_id,
            environment: &self.environment,
            secret_path: &path,
            secret_type: SECRET_TYPE,
            secret_value: Some(value.as_str()),
        };

        let request = self.http.request(method, self.secret_url(key)).json(&body);
        let secret = self.read_envelope(name, operation, request).await?;

        info!(secret = %name, version = secret.version, operation, "Stored secret in Infisical");
        Ok(secret)
    }

    async fn read(&self, name: &str, version: Option<u64>) -> Result<Secret> {
        let (path, key) = split_path(name);
        let mut query = vec![
            ("workspaceId", self.project_id.clone()),
            ("environment", self.environment.clone()),
            ("secretPath", path),
            ("type", SECRET_TYPE.to_string()),
        ];
        if let Some(version) = version {
            query.push(("version", version.to_string()));
        }

        debug!(secret = %name, ?version, "Reading secret from Infisical");
        let request = self.http.get(self.secret_url(key)).query(&query);
        let secret = self.read_envelope(name, "read", request).await?;

        match version {
            Some(expected) if secret.version != expected => {
                Err(Error::version_not_found(name, expected))
            }
            _ => Ok(secret),
        }
    }

    async fn read_envelope(
        &self,
        name: &str,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Secret> {
        let response = self.send(name, operation, request).await?;
        let envelope: SecretEnvelope = response.json().await.map_err(|e| {
            Error::backend(format!("infisical {} '{}': malformed response: {}", operation, name, e))
        })?;
        let payload = base64::engine::general_purpose::STANDARD
            .decode(&envelope.secret.secret_value)
            .map_err(|e| {
                Error::backend(format!("infisical secret '{}' payload is not base64: {}", name, e))
            })?;

        Ok(Secret::new(name, envelope.secret.version, payload))
    }
}

#[async_trait]
impl SecretBackend for InfisicalSecretBackend {
    async fn create_secret(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.write(name, "create", reqwest::Method::POST, payload).await
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.write(name, "update", reqwest::Method::PATCH, payload).await
    }

    async fn get_version(&self, name: &str, version: u64) -> Result<Secret> {
        ensure_version(name, version)?;
        self.read(name, Some(version)).await.map_err(|e| match e {
            Error::SecretNotFound { .. } => Error::version_not_found(name, version),
            other => other,
        })
    }

    async fn get_latest_version(&self, name: &str) -> Result<Secret> {
        self.read(name, None).await
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        let (path, key) = split_path(name);
        let body = WriteSecretRequest {
            workspace_id: &self.project_id,
            environment: &self.environment,
            secret_path: &path,
            secret_type: SECRET_TYPE,
            secret_value: None,
        };

        let request = self.http.delete(self.secret_url(key)).json(&body);
        self.send(name, "delete", request).await?;

        info!(secret = %name, "Deleted secret from Infisical");
        Ok(())
    }

    fn backend_type(&self) -> SecretBackendType {
        SecretBackendType::Infisical
    }
}

async fn login(
    http: &reqwest::Client,
    site_url: &str,
    config: &InfisicalConfig,
) -> Result<SecretString> {
    let auth = &config.auth;
    let (endpoint, body) = match auth.strategy {
        InfisicalAuthStrategy::Universal => {
            let universal = auth.universal.as_ref().ok_or_else(|| {
                Error::config("universal auth strategy requires auth.universal configuration")
            })?;
            (
                "universal-auth",
                serde_json::json!({
                    "clientId": universal.client_id,
                    "clientSecret": universal.client_secret.expose_secret(),
                }),
            )
        }
        InfisicalAuthStrategy::GcpIdToken => {
            let gcp = auth.gcp.as_ref().ok_or_else(|| {
                Error::config("gcp_id_token auth strategy requires auth.gcp configuration")
            })?;
            let metadata = MetadataClient::new(http.clone(), config.metadata_url.clone());
            let jwt = metadata.identity_token(&gcp.identity_id).await?;
            (
                "gcp-auth",
                serde_json::json!({
                    "identityId": gcp.identity_id,
                    "jwt": jwt.expose_secret(),
                }),
            )
        }
        InfisicalAuthStrategy::GcpIam => {
            let gcp = auth.gcp.as_ref().ok_or_else(|| {
                Error::config("gcp_iam auth strategy requires auth.gcp configuration")
            })?;
            let key_path = gcp.service_account_key_file_path.as_ref().ok_or_else(|| {
                Error::config("gcp_iam auth strategy requires service_account_key_file_path")
            })?;
            let key = ServiceAccountKey::from_file(key_path)?;
            let jwt = key.sign_jwt(&gcp.identity_id, IAM_JWT_TTL)?;
            (
                "gcp-auth",
                serde_json::json!({
                    "identityId": gcp.identity_id,
                    "jwt": jwt.expose_secret(),
                }),
            )
        }
    };

    let url = format!("{}/api/v1/auth/{}/login", site_url, endpoint);
    debug!(endpoint, "Logging in to Infisical");

    let response = http.post(&url).json(&body).send().await.map_err(|e| {
        Error::backend_unavailable(format!("Failed to reach Infisical at {}: {}", site_url, e))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), endpoint, "Infisical login rejected");
        return Err(Error::backend_unavailable(format!(
            "Infisical login failed with status {}: {}",
            status, body
        )));
    }

    let login: LoginResponse = response
        .json()
        .await
        .map_err(|e| Error::backend_unavailable(format!("Malformed Infisical login response: {}", e)))?;
    Ok(SecretString::new(login.access_token))
}
