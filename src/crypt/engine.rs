//! Envelope encryption over a [`KeyProvider`].
//!
//! [`Crypt::encrypt`] always seals under the latest key version and records
//! that version in the resulting [`Capsule`]. [`Crypt::decrypt`] opens with
//! exactly the recorded version. [`Crypt::recrypt`] is the rotation primitive:
//! it moves a capsule onto the latest key version without the plaintext
//! leaving the process.

use super::capsule::Capsule;
use super::cipher;
use super::key_provider::{Key, KeyProvider};
use crate::errors::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

/// AES-GCM envelope encryption engine.
#[derive(Clone)]
pub struct Crypt {
    keys: Arc<dyn KeyProvider>,
}

impl fmt::Debug for Crypt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crypt").field("keys", &"[KeyProvider]").finish()
    }
}

impl Crypt {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    /// Seal `plaintext` under the latest version of `key_name`.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub async fn encrypt(&self, plaintext: &[u8], key_name: &str) -> Result<Capsule> {
        let key = self.keys.get_key(key_name).await?;
        Self::seal_with(&key, plaintext)
    }

    /// Open `capsule` with the key version it was sealed under.
    #[instrument(skip(self, capsule), fields(key_name = %capsule.key_name, key_version = capsule.key_version))]
    pub async fn decrypt(&self, capsule: &Capsule) -> Result<Vec<u8>> {
        let key = self.keys.get_key_version(&capsule.key_name, capsule.key_version).await?;
        Self::open_with(&key, capsule)
    }

    /// Re-encrypt `capsule` under the latest version of its key.
    ///
    /// Returns the capsule unchanged when it already uses the latest version.
    /// A latest version older than the capsule's is rejected with
    /// [`Error::KeyDowngrade`].
    #[instrument(skip(self, capsule), fields(key_name = %capsule.key_name, key_version = capsule.key_version))]
    pub async fn recrypt(&self, capsule: &Capsule) -> Result<Capsule> {
        let latest = self.keys.get_key(&capsule.key_name).await?;

        if latest.version == capsule.key_version {
            debug!("Capsule already uses the latest key version");
            return Ok(capsule.clone());
        }
        if latest.version < capsule.key_version {
            return Err(Error::KeyDowngrade {
                name: capsule.key_name.clone(),
                capsule_version: capsule.key_version,
                latest_version: latest.version,
            });
        }

        let original = self.keys.get_key_version(&capsule.key_name, capsule.key_version).await?;
        let plaintext = Zeroizing::new(Self::open_with(&original, capsule)?);
        let recrypted = Self::seal_with(&latest, &plaintext)?;

        info!(
            key_name = %capsule.key_name,
            from_version = capsule.key_version,
            to_version = latest.version,
            "Recrypted capsule"
        );
        Ok(recrypted)
    }

    fn seal_with(key: &Key, plaintext: &[u8]) -> Result<Capsule> {
        let data = cipher::seal(key.data(), plaintext).map_err(|e| Self::name_key(e, key))?;
        Ok(Capsule::new(data, key.name.clone(), key.version))
    }

    fn open_with(key: &Key, capsule: &Capsule) -> Result<Vec<u8>> {
        cipher::open(key.data(), &capsule.data).map_err(|e| Self::name_key(e, key))
    }

    fn name_key(error: Error, key: &Key) -> Error {
        match error {
            Error::InvalidKey { reason, .. } => {
                Error::invalid_key(format!("{}@{}", key.name, key.version), reason)
            }
            other => other,
        }
    }
}
