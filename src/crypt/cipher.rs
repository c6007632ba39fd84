//! AES-GCM primitives
//!
//! Ciphertexts produced here are laid out as `nonce ‖ ciphertext ‖ tag` with a
//! fresh 12-byte random nonce per seal. The AES variant follows the key
//! length: 16, 24 and 32 bytes select AES-128, AES-192 and AES-256-GCM.
//! ring has no AES-192, so 24-byte keys go through `aes-gcm`.

use crate::errors::{Error, Result};
use crate::secrets::SecretString;
use aes_gcm::aead::generic_array::{typenum::U12, GenericArray};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::AesGcm;
use base64::Engine;
use ring::aead::{self, Aad, Algorithm, BoundKey, Nonce, NonceSequence, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::sync::Arc;
use tracing::{error, instrument};
use zeroize::Zeroizing;

/// Size of the GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Smallest well-formed sealed message (empty plaintext).
pub const MIN_SEALED_LEN: usize = NONCE_SIZE + TAG_SIZE;

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

type Aes192Gcm = AesGcm<aes::Aes192, U12>;

/// GCM implementation selected by key length
#[derive(Clone, Copy, Debug)]
pub enum GcmVariant {
    Ring(&'static Algorithm),
    Aes192,
}

/// Pick the GCM variant for a raw key, or explain why the key is unusable.
pub fn variant_for(key: &[u8]) -> std::result::Result<GcmVariant, String> {
    match key.len() {
        16 => Ok(GcmVariant::Ring(&aead::AES_128_GCM)),
        24 => Ok(GcmVariant::Aes192),
        32 => Ok(GcmVariant::Ring(&aead::AES_256_GCM)),
        n => Err(format!("expected a 16, 24 or 32 byte key, got {} bytes", n)),
    }
}

/// Encrypt `plaintext` under `key`, returning `nonce ‖ ciphertext ‖ tag`.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let variant = variant_for(key).map_err(|reason| Error::invalid_key("<raw>", reason))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    SystemRandom::new().fill(&mut nonce_bytes).map_err(|_| {
        error!("Failed to generate random nonce");
        Error::internal("Failed to generate random nonce for encryption")
    })?;

    let algorithm = match variant {
        GcmVariant::Ring(algorithm) => algorithm,
        GcmVariant::Aes192 => return seal_aes192(key, nonce_bytes, plaintext),
    };

    let unbound_key = UnboundKey::new(algorithm, key)
        .map_err(|_| Error::internal("Failed to create encryption key"))?;
    let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut sealed = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
    sealed.extend_from_slice(&nonce_bytes);
    let mut in_out = plaintext.to_vec();
    sealing_key.seal_in_place_append_tag(Aad::empty(), &mut in_out).map_err(|_| {
        error!("Encryption failed");
        Error::internal("Failed to encrypt data")
    })?;
    sealed.extend_from_slice(&in_out);

    Ok(sealed)
}

/// Decrypt a `nonce ‖ ciphertext ‖ tag` message produced by [`seal`].
///
/// Truncated input and tag mismatches are both reported as
/// [`Error::DecryptionFailed`].
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    let variant = variant_for(key).map_err(|reason| Error::invalid_key("<raw>", reason))?;

    if sealed.len() < MIN_SEALED_LEN {
        return Err(Error::decryption_failed(format!(
            "ciphertext too short: expected at least {} bytes, got {}",
            MIN_SEALED_LEN,
            sealed.len()
        )));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce);

    let algorithm = match variant {
        GcmVariant::Ring(algorithm) => algorithm,
        GcmVariant::Aes192 => return open_aes192(key, nonce_bytes, ciphertext),
    };

    let unbound_key = UnboundKey::new(algorithm, key)
        .map_err(|_| Error::internal("Failed to create decryption key"))?;
    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| Error::decryption_failed("message authentication failed"))?;

    Ok(plaintext.to_vec())
}

fn seal_aes192(key: &[u8], nonce_bytes: [u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes192Gcm::new_from_slice(key)
        .map_err(|_| Error::internal("Failed to create encryption key"))?;
    let ciphertext =
        cipher.encrypt(GenericArray::from_slice(&nonce_bytes), plaintext).map_err(|_| {
            error!("Encryption failed");
            Error::internal("Failed to encrypt data")
        })?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open_aes192(key: &[u8], nonce_bytes: [u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes192Gcm::new_from_slice(key)
        .map_err(|_| Error::internal("Failed to create decryption key"))?;
    cipher
        .decrypt(GenericArray::from_slice(&nonce_bytes), ciphertext)
        .map_err(|_| Error::decryption_failed("message authentication failed"))
}

/// Symmetric "pepper" applied to payloads before they reach the cache store.
///
/// Values are sealed with [`seal`] and carried as standard base64 text.
#[derive(Clone)]
pub struct PepperCipher {
    key: Arc<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for PepperCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PepperCipher").field("key", &"[REDACTED]").finish()
    }
}

impl PepperCipher {
    /// Build from raw key bytes (16, 24 or 32).
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = Zeroizing::new(key.into());
        variant_for(&key).map_err(|reason| Error::invalid_key("encryption_key", reason))?;
        Ok(Self { key: Arc::new(key) })
    }

    /// Build from configuration. The value is taken as raw bytes when it is
    /// already a valid key length, otherwise it must be base64.
    pub fn from_secret(value: &SecretString) -> Result<Self> {
        let raw = value.expose_secret().as_bytes();
        if variant_for(raw).is_ok() {
            return Self::new(raw.to_vec());
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value.expose_secret())
            .map_err(|e| Error::config(format!("Invalid base64 in redis encryption_key: {}", e)))?;
        Self::new(decoded)
    }

    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let sealed = seal(&self.key, plaintext)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }

    #[instrument(skip(self, encoded), fields(encoded_len = encoded.len()))]
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::decryption_failed(format!("stored value is not base64: {}", e)))?;
        open(&self.key, &sealed)
    }
}
