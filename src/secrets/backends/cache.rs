//! Cache-backed secret storage
//!
//! Each secret is one list under `vault:<name>`, newest version at the head.
//! The list length after a push is the new version number, and version `v`
//! sits at index `-v` counted from the tail. Elements are never removed
//! individually, so that mapping stays stable until the whole list is
//! deleted.
//!
//! Payloads are sealed with a [`PepperCipher`] before they reach the store.
//! This protects data at rest in the cache only and is independent of
//! envelope encryption in [`crate::crypt`].
//!
//! Concurrent `add_version` calls each get a distinct version from the store,
//! but the order in which racing callers reach the store is not defined.

use super::backend::{ensure_version, SecretBackend, SecretBackendType};
use crate::crypt::PepperCipher;
use crate::errors::{Error, Result};
use crate::secrets::types::{Secret, SecretString};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use validator::Validate;

/// Reads the list length and one element in a single server-side step so the
/// reported version always matches the returned element.
const READ_AT_SCRIPT: &str = r#"
local len = redis.call('LLEN', KEYS[1])
local item = redis.call('LINDEX', KEYS[1], ARGV[1])
return {len, item}
"#;

/// Configuration for the Redis cache backend
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RedisConfig {
    /// Redis connection URL, e.g. `redis://localhost:6379/0`
    #[validate(length(min = 1))]
    pub url: String,
    /// Pepper key: 16, 24 or 32 raw bytes, otherwise the base64 encoding of
    /// such a key
    pub encryption_key: SecretString,
}

/// Ordered list storage used by [`CacheSecretBackend`].
///
/// Index semantics follow Redis `LINDEX`: 0 is the head, negative indices
/// count from the tail.
#[async_trait]
pub trait ListStore: Send + Sync + fmt::Debug {
    /// Push to the head, returning the list length afterwards.
    async fn push_head(&self, key: &str, value: String) -> Result<u64>;

    /// Atomically read the list length and the element at `index`.
    async fn read_at(&self, key: &str, index: i64) -> Result<(u64, Option<String>)>;

    /// Delete the whole list. Returns false when it did not exist.
    async fn delete(&self, key: &str) -> Result<bool>;
}

fn map_redis_error(operation: &str, key: &str, e: redis::RedisError) -> Error {
    error!(error = %e, operation, key, "Redis command failed");
    if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped()
    {
        Error::backend_unavailable(format!("redis {} on '{}': {}", operation, key, e))
    } else {
        Error::backend(format!("redis {} on '{}': {}", operation, key, e))
    }
}

/// [`ListStore`] over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisListStore {
    conn: ConnectionManager,
    read_at: Arc<redis::Script>,
}

impl fmt::Debug for RedisListStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisListStore").finish_non_exhaustive()
    }
}

impl RedisListStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, read_at: Arc::new(redis::Script::new(READ_AT_SCRIPT)) }
    }

    /// Open a connection manager for `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::config(format!("Invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::backend_unavailable(format!("Failed to connect to redis: {}", e)))?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl ListStore for RedisListStore {
    async fn push_head(&self, key: &str, value: String) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, u64>(key, value).await.map_err(|e| map_redis_error("LPUSH", key, e))
    }

    async fn read_at(&self, key: &str, index: i64) -> Result<(u64, Option<String>)> {
        let mut conn = self.conn.clone();
        self.read_at
            .key(key)
            .arg(index)
            .invoke_async::<_, (u64, Option<String>)>(&mut conn)
            .await
            .map_err(|e| map_redis_error("read", key, e))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await.map_err(|e| map_redis_error("DEL", key, e))?;
        Ok(removed > 0)
    }
}

/// In-process [`ListStore`], for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryListStore {
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored elements, head first.
    ///
    /// Test utility for inspecting what reached the store. Values are the
    /// pepper-sealed base64 text, never plaintext.
    pub async fn raw(&self, key: &str) -> Vec<String> {
        self.lists.lock().await.get(key).cloned().unwrap_or_default()
    }

    /// Overwrite the element at `index` (head = 0).
    #[cfg(test)]
    pub(crate) async fn overwrite(&self, key: &str, index: usize, value: String) -> bool {
        match self.lists.lock().await.get_mut(key).and_then(|list| list.get_mut(index)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push_head(&self, key: &str, value: String) -> Result<u64> {
        let mut lists = self.lists.lock().await;
        let list = lists.entry(key.to_string()).or_default();
        list.insert(0, value);
        Ok(list.len() as u64)
    }

    async fn read_at(&self, key: &str, index: i64) -> Result<(u64, Option<String>)> {
        let lists = self.lists.lock().await;
        let Some(list) = lists.get(key) else {
            return Ok((0, None));
        };

        let len = list.len() as i64;
        let position = if index < 0 { len + index } else { index };
        let item = if (0..len).contains(&position) {
            list.get(position as usize).cloned()
        } else {
            None
        };
        Ok((len as u64, item))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lists.lock().await.remove(key).is_some())
    }
}

/// Secret backend storing pepper-encrypted versions in a list store.
pub struct CacheSecretBackend {
    store: Arc<dyn ListStore>,
    pepper: PepperCipher,
}

impl fmt::Debug for CacheSecretBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSecretBackend")
            .field("store", &self.store)
            .field("pepper", &self.pepper)
            .finish()
    }
}

impl CacheSecretBackend {
    pub fn new(store: Arc<dyn ListStore>, pepper: PepperCipher) -> Self {
        Self { store, pepper }
    }

    /// Connect to Redis and build the backend from configuration.
    pub async fn from_config(config: &RedisConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(format!("Invalid redis configuration: {}", e)))?;
        if config.encryption_key.is_empty() {
            return Err(Error::config("encryption_key is required for the redis backend"));
        }

        let pepper = PepperCipher::from_secret(&config.encryption_key)?;
        let store = RedisListStore::connect(&config.url).await?;

        info!("Redis cache secret backend initialized");
        Ok(Self::new(Arc::new(store), pepper))
    }

    fn key_name(name: &str) -> String {
        format!("vault:{}", name)
    }

    async fn push(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        let sealed = self.pepper.encrypt(payload)?;
        let version = self.store.push_head(&Self::key_name(name), sealed).await?;

        info!(secret = %name, version, "Stored secret version in cache");
        Ok(Secret::new(name, version, payload))
    }
}

#[async_trait]
impl SecretBackend for CacheSecretBackend {
    async fn create_secret(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.push(name, payload).await
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.push(name, payload).await
    }

    async fn get_version(&self, name: &str, version: u64) -> Result<Secret> {
        ensure_version(name, version)?;
        let index = i64::try_from(version)
            .map_err(|_| Error::version_not_found(name, version))?
            .checked_neg()
            .ok_or_else(|| Error::version_not_found(name, version))?;

        debug!(secret = %name, version, "Reading secret version from cache");
        let (len, item) = self.store.read_at(&Self::key_name(name), index).await?;
        if len == 0 {
            return Err(Error::secret_not_found(name));
        }
        let sealed = item.ok_or_else(|| Error::version_not_found(name, version))?;

        let payload = self.pepper.decrypt(&sealed)?;
        Ok(Secret::new(name, version, payload))
    }

    async fn get_latest_version(&self, name: &str) -> Result<Secret> {
        debug!(secret = %name, "Reading latest secret version from cache");
        let (len, item) = self.store.read_at(&Self::key_name(name), 0).await?;
        let sealed = match item {
            Some(sealed) if len > 0 => sealed,
            _ => return Err(Error::secret_not_found(name)),
        };

        let payload = self.pepper.decrypt(&sealed)?;
        Ok(Secret::new(name, len, payload))
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        if !self.store.delete(&Self::key_name(name)).await? {
            return Err(Error::secret_not_found(name));
        }
        info!(secret = %name, "Deleted secret from cache");
        Ok(())
    }

    fn backend_type(&self) -> SecretBackendType {
        SecretBackendType::Redis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn backend() -> (CacheSecretBackend, Arc<MemoryListStore>) {
        let store = Arc::new(MemoryListStore::new());
        let pepper = PepperCipher::new(vec![0x42u8; 32]).unwrap();
        (CacheSecretBackend::new(store.clone(), pepper), store)
    }

    #[tokio::test]
    async fn test_versions_follow_list_length() {
        let (backend, _) = backend();

        let v1 = backend.create_secret("foo", b"p1").await.unwrap();
        let v2 = backend.add_version("foo", b"p2").await.unwrap();
        let v3 = backend.add_version("foo", b"p3").await.unwrap();

        assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_get_version_and_latest() {
        let (backend, _) = backend();
        backend.create_secret("foo", b"p1").await.unwrap();
        backend.add_version("foo", b"p2").await.unwrap();

        let latest = backend.get_latest_version("foo").await.unwrap();
        assert_eq!(latest, Secret::new("foo", 2, b"p2".to_vec()));

        let first = backend.get_version("foo", 1).await.unwrap();
        assert_eq!(first, Secret::new("foo", 1, b"p1".to_vec()));
    }

    #[tokio::test]
    async fn test_values_are_encrypted_at_rest() {
        let (backend, store) = backend();
        backend.create_secret("foo", b"plain-value").await.unwrap();

        let raw = store.raw("vault:foo").await;
        assert_eq!(raw.len(), 1);
        assert!(!raw[0].contains("plain-value"));
    }

    #[tokio::test]
    async fn test_missing_secret_and_version() {
        let (backend, _) = backend();

        assert!(matches!(
            backend.get_latest_version("nope").await.unwrap_err(),
            Error::SecretNotFound { .. }
        ));
        assert!(matches!(
            backend.get_version("nope", 1).await.unwrap_err(),
            Error::SecretNotFound { .. }
        ));

        backend.create_secret("foo", b"p1").await.unwrap();
        assert!(matches!(
            backend.get_version("foo", 2).await.unwrap_err(),
            Error::VersionNotFound { version: 2, .. }
        ));
        assert!(matches!(
            backend.get_version("foo", 0).await.unwrap_err(),
            Error::VersionNotFound { version: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_corrupted_value_fails_decryption() {
        let (backend, store) = backend();
        backend.create_secret("foo", b"p1").await.unwrap();

        let engine = base64::engine::general_purpose::STANDARD;
        let mut sealed = engine.decode(store.raw("vault:foo").await.remove(0)).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(store.overwrite("vault:foo", 0, engine.encode(sealed)).await);

        let err = backend.get_latest_version("foo").await.unwrap_err();
        assert!(matches!(err, Error::DecryptionFailed { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_all_versions() {
        let (backend, _) = backend();
        backend.create_secret("foo", b"p1").await.unwrap();
        backend.add_version("foo", b"p2").await.unwrap();

        backend.delete_secret("foo").await.unwrap();
        assert!(backend.get_latest_version("foo").await.unwrap_err().is_not_found());
        assert!(matches!(
            backend.delete_secret("foo").await.unwrap_err(),
            Error::SecretNotFound { .. }
        ));

        let recreated = backend.create_secret("foo", b"p3").await.unwrap();
        assert_eq!(recreated.version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_add_version_assigns_distinct_versions() {
        let (backend, _) = backend();
        let backend = Arc::new(backend);
        backend.create_secret("foo", b"p0").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend.add_version("foo", format!("p{}", i + 1).as_bytes()).await.unwrap()
                })
            })
            .collect();

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().version);
        }
        versions.sort_unstable();
        assert_eq!(versions, (2..=9).collect::<Vec<u64>>());

        let latest = backend.get_latest_version("foo").await.unwrap();
        let exact = backend.get_version("foo", latest.version).await.unwrap();
        assert_eq!(latest.payload, exact.payload);
    }

    #[test]
    fn test_debug_redacts_pepper() {
        let (backend, _) = backend();
        let debug_output = format!("{:?}", backend);
        assert!(debug_output.contains("[REDACTED]"));
    }
}
