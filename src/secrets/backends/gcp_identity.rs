//! GCP workload identity helpers
//!
//! Token sources used by the backends that log in with a Google identity:
//! the GCE metadata server (identity and access tokens), the IAM Credentials
//! `signJwt` API, and locally signed service account JWTs.

use crate::errors::{Error, Result};
use crate::secrets::types::SecretString;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error};

/// Default GCE metadata server
pub const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal";

/// Default IAM Credentials API endpoint
pub const DEFAULT_IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com";

const METADATA_FLAVOR: &str = "Metadata-Flavor";
const SERVICE_ACCOUNT_PATH: &str = "computeMetadata/v1/instance/service-accounts/default";

pub(crate) fn default_metadata_url() -> String {
    DEFAULT_METADATA_URL.to_string()
}

pub(crate) fn default_iam_credentials_url() -> String {
    DEFAULT_IAM_CREDENTIALS_URL.to_string()
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

async fn unavailable(context: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(status = status.as_u16(), context, "GCP identity request rejected");
    Error::backend_unavailable(format!("{} failed with status {}: {}", context, status, body))
}

/// Client for the GCE metadata server.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

impl MetadataClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    /// Fetch an OIDC identity token for `audience` in full format.
    pub async fn identity_token(&self, audience: &str) -> Result<SecretString> {
        let url = format!("{}/{}/identity", self.base_url, SERVICE_ACCOUNT_PATH);
        debug!(audience, "Requesting identity token from metadata server");

        let response = self
            .http
            .get(&url)
            .header(METADATA_FLAVOR, "Google")
            .query(&[("audience", audience), ("format", "full")])
            .send()
            .await
            .map_err(|e| {
                Error::backend_unavailable(format!("Metadata server unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(unavailable("identity token request", response).await);
        }

        let token = response.text().await.map_err(|e| {
            Error::backend_unavailable(format!("Failed to read identity token: {}", e))
        })?;
        Ok(SecretString::new(token.trim()))
    }

    /// Fetch an OAuth2 access token for the instance's default service account.
    pub async fn access_token(&self) -> Result<SecretString> {
        let url = format!("{}/{}/token", self.base_url, SERVICE_ACCOUNT_PATH);
        debug!("Requesting access token from metadata server");

        let response =
            self.http.get(&url).header(METADATA_FLAVOR, "Google").send().await.map_err(|e| {
                Error::backend_unavailable(format!("Metadata server unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(unavailable("access token request", response).await);
        }

        let body: AccessTokenResponse = response.json().await.map_err(|e| {
            Error::backend_unavailable(format!("Malformed access token response: {}", e))
        })?;
        Ok(SecretString::new(body.access_token))
    }
}

#[derive(Serialize)]
struct SignJwtRequest {
    payload: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignJwtResponse {
    signed_jwt: String,
}

/// Have Google sign `claims` as `service_account_email` via the IAM
/// Credentials API, authenticating with `access_token`.
pub async fn sign_jwt_with_iam(
    http: &reqwest::Client,
    iam_base_url: &str,
    access_token: &SecretString,
    service_account_email: &str,
    claims: &serde_json::Value,
) -> Result<SecretString> {
    let url = format!(
        "{}/v1/projects/-/serviceAccounts/{}:signJwt",
        iam_base_url.trim_end_matches('/'),
        service_account_email
    );
    let request = SignJwtRequest { payload: serde_json::to_string(claims)? };
    debug!(service_account = %service_account_email, "Requesting IAM-signed JWT");

    let response = http
        .post(&url)
        .bearer_auth(access_token.expose_secret())
        .json(&request)
        .send()
        .await
        .map_err(|e| Error::backend_unavailable(format!("IAM credentials unreachable: {}", e)))?;

    if !response.status().is_success() {
        return Err(unavailable("signJwt request", response).await);
    }

    let body: SignJwtResponse = response
        .json()
        .await
        .map_err(|e| Error::backend_unavailable(format!("Malformed signJwt response: {}", e)))?;
    Ok(SecretString::new(body.signed_jwt))
}

/// Claims for a short-lived JWT asserting a service account identity.
pub fn service_account_claims(
    service_account_email: &str,
    audience: &str,
    ttl: Duration,
) -> serde_json::Value {
    let now = unix_now();
    serde_json::json!({
        "sub": service_account_email,
        "aud": audience,
        "iat": now,
        "exp": now + ttl.as_secs(),
    })
}

/// Service account key file, as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key_id: String,
    pub private_key: SecretString,
}

#[derive(Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read service account key file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let key: Self = serde_json::from_str(&contents).map_err(|e| {
            Error::config(format!("Invalid service account key file '{}': {}", path.display(), e))
        })?;
        Ok(key)
    }

    /// Sign an RS256 JWT for `audience` with the key's private key.
    pub fn sign_jwt(&self, audience: &str, ttl: Duration) -> Result<SecretString> {
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes())
            .map_err(|e| Error::config(format!("Invalid service account private key: {}", e)))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.private_key_id.clone());

        let now = unix_now();
        let claims = ServiceAccountClaims {
            iss: &self.client_email,
            sub: &self.client_email,
            aud: audience,
            iat: now,
            exp: now + ttl.as_secs(),
        };

        let token = encode(&header, &claims, &encoding_key)
            .map_err(|e| Error::internal(format!("Failed to sign service account JWT: {}", e)))?;
        Ok(SecretString::new(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_identity_token_from_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/instance/service-accounts/default/identity"))
            .and(header("Metadata-Flavor", "Google"))
            .and(query_param("audience", "http://vault/my-role"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_string("id-token\n"))
            .expect(1)
            .mount(&server)
            .await;

        let client = MetadataClient::new(reqwest::Client::new(), server.uri());
        let token = client.identity_token("http://vault/my-role").await.unwrap();
        assert_eq!(token.expose_secret(), "id-token");
    }

    #[tokio::test]
    async fn test_metadata_rejection_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = MetadataClient::new(reqwest::Client::new(), format!("{}/", server.uri()));
        let err = client.access_token().await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_sign_jwt_with_iam() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/-/serviceAccounts/sa@proj.iam.gserviceaccount.com:signJwt"))
            .and(header("authorization", "Bearer access-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"keyId": "k1", "signedJwt": "signed"})),
            )
            .mount(&server)
            .await;

        let claims = service_account_claims(
            "sa@proj.iam.gserviceaccount.com",
            "vault/my-role",
            Duration::from_secs(900),
        );
        let jwt = sign_jwt_with_iam(
            &reqwest::Client::new(),
            &server.uri(),
            &SecretString::new("access-token"),
            "sa@proj.iam.gserviceaccount.com",
            &claims,
        )
        .await
        .unwrap();

        assert_eq!(jwt.expose_secret(), "signed");
    }

    #[tokio::test]
    async fn test_sign_jwt_request_carries_claims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/-/serviceAccounts/sa@example.com:signJwt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "signedJwt": "signed"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let claims = serde_json::json!({"aud": "vault/role"});
        sign_jwt_with_iam(
            &reqwest::Client::new(),
            &server.uri(),
            &SecretString::new("t"),
            "sa@example.com",
            &claims,
        )
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload["aud"], "vault/role");
    }

    #[test]
    fn test_service_account_claims() {
        let claims =
            service_account_claims("sa@example.com", "identity-1", Duration::from_secs(60));
        assert_eq!(claims["sub"], "sa@example.com");
        assert_eq!(claims["aud"], "identity-1");
        let iat = claims["iat"].as_u64().unwrap();
        assert_eq!(claims["exp"].as_u64().unwrap(), iat + 60);
    }

    #[test]
    fn test_service_account_key_file_errors() {
        let err = ServiceAccountKey::from_file("/nonexistent/key.json").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{\"client_email\": \"x\"}").unwrap();
        let err = ServiceAccountKey::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_service_account_jwt_verifies() {
        use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};

        let key = ServiceAccountKey {
            client_email: "sa@proj.iam.gserviceaccount.com".into(),
            private_key_id: "key-1".into(),
            private_key: SecretString::new(include_str!(
                "../../../tests/fixtures/service_account.pem"
            )),
        };
        let token = key.sign_jwt("identity-1", Duration::from_secs(300)).unwrap();

        let header = decode_header(token.expose_secret()).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("key-1"));

        let decoding_key =
            DecodingKey::from_rsa_pem(include_bytes!("../../../tests/fixtures/service_account.pub.pem"))
                .unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["identity-1"]);
        let data =
            decode::<serde_json::Value>(token.expose_secret(), &decoding_key, &validation).unwrap();
        assert_eq!(data.claims["sub"], "sa@proj.iam.gserviceaccount.com");
    }

    #[test]
    fn test_invalid_private_key_is_config_error() {
        let key = ServiceAccountKey {
            client_email: "sa@example.com".into(),
            private_key_id: "abc".into(),
            private_key: SecretString::new("not a pem"),
        };
        let err = key.sign_jwt("aud", Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
