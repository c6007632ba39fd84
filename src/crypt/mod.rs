//! Envelope encryption.
//!
//! Plaintext is sealed with AES-GCM under a named, versioned key obtained
//! from a [`KeyProvider`]. The result is a [`Capsule`] that records the key
//! version, so data written before a rotation stays readable and can later be
//! moved onto the new version with [`Crypt::recrypt`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strongbox::crypt::{Crypt, VaultKeyProvider};
//!
//! let keys = VaultKeyProvider::new(vault);
//! keys.create_key("db-key").await?;
//!
//! let crypt = Crypt::new(Arc::new(keys.clone()));
//! let capsule = crypt.encrypt(b"card number", "db-key").await?;
//!
//! keys.rotate_key("db-key").await?;
//! let capsule = crypt.recrypt(&capsule).await?;
//! ```

pub mod capsule;
pub mod cipher;
pub mod engine;
pub mod key_provider;

pub use capsule::Capsule;
pub use cipher::{open, seal, PepperCipher};
pub use engine::Crypt;
pub use key_provider::{Key, KeyProvider, VaultKeyProvider};
