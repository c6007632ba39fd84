//! Symmetric keys backed by versioned secrets.

use crate::errors::{Error, Result};
use crate::secrets::{Secret, Vault};
use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};
use zeroize::Zeroizing;

/// Size of keys generated by [`VaultKeyProvider`] (AES-256).
pub const GENERATED_KEY_SIZE: usize = 32;

/// Raw symmetric key material at a specific version.
#[derive(Clone)]
pub struct Key {
    pub name: String,
    pub version: u64,
    data: Zeroizing<Vec<u8>>,
}

impl Key {
    pub fn new(name: impl Into<String>, version: u64, data: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), version, data: Zeroizing::new(data.into()) }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("data", &format_args!("[{} bytes REDACTED]", self.data.len()))
            .finish()
    }
}

impl From<Secret> for Key {
    fn from(secret: Secret) -> Self {
        Self { name: secret.name, version: secret.version, data: Zeroizing::new(secret.payload) }
    }
}

/// Source of key material for [`Crypt`](super::Crypt).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Latest version of the named key.
    async fn get_key(&self, name: &str) -> Result<Key>;

    /// Exact version of the named key.
    async fn get_key_version(&self, name: &str, version: u64) -> Result<Key>;
}

/// [`KeyProvider`] that reads keys as secrets from a [`Vault`].
#[derive(Debug, Clone)]
pub struct VaultKeyProvider {
    vault: Arc<Vault>,
}

impl VaultKeyProvider {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    fn generate() -> Result<Zeroizing<Vec<u8>>> {
        let mut key = Zeroizing::new(vec![0u8; GENERATED_KEY_SIZE]);
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| Error::internal("Failed to generate random key material"))?;
        Ok(key)
    }

    /// Create the named key with fresh random material as its first version.
    #[instrument(skip(self))]
    pub async fn create_key(&self, name: &str) -> Result<Key> {
        let material = Self::generate()?;
        let secret = self.vault.create_secret(name, &material).await?;
        info!(key = %name, version = secret.version, "Created encryption key");
        Ok(secret.into())
    }

    /// Append a new random version of the named key.
    ///
    /// Existing capsules keep opening under their recorded version; pass them
    /// through [`Crypt::recrypt`](super::Crypt::recrypt) to move them onto the
    /// new one.
    #[instrument(skip(self))]
    pub async fn rotate_key(&self, name: &str) -> Result<Key> {
        let material = Self::generate()?;
        let secret = self.vault.add_version(name, &material).await?;
        info!(key = %name, version = secret.version, "Rotated encryption key");
        Ok(secret.into())
    }
}

#[async_trait]
impl KeyProvider for VaultKeyProvider {
    async fn get_key(&self, name: &str) -> Result<Key> {
        Ok(self.vault.get_latest_version(name).await?.into())
    }

    async fn get_key_version(&self, name: &str, version: u64) -> Result<Key> {
        Ok(self.vault.get_version(name, version).await?.into())
    }
}
