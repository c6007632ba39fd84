//! Common test utilities for all integration tests.
//!
//! Provides an in-memory vault and a fixed-key provider so tests run without
//! any external secret service.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use strongbox::crypt::{Key, KeyProvider, PepperCipher};
use strongbox::driver::DriverFactory;
use strongbox::secrets::backends::{CacheSecretBackend, MemoryListStore};
use strongbox::secrets::{BackendRegistry, SecretBackend, SecretBackendType, Vault};
use strongbox::{Error, Result};

/// Pepper used by every in-memory cache backend.
pub const TEST_PEPPER: [u8; 32] = [7u8; 32];

/// Vault whose default driver is a Redis-style backend over memory.
///
/// Returns the store too, so tests can inspect what reached it.
pub fn memory_vault() -> (Arc<Vault>, Arc<MemoryListStore>) {
    let store = Arc::new(MemoryListStore::new());
    let shared = store.clone();
    let registry = BackendRegistry::new([DriverFactory::new(SecretBackendType::Redis, move || {
        let store = shared.clone();
        async move {
            let pepper = PepperCipher::new(TEST_PEPPER.to_vec()).expect("valid pepper");
            let backend: Arc<dyn SecretBackend> = Arc::new(CacheSecretBackend::new(store, pepper));
            Ok(backend)
        }
    })]);
    (Arc::new(Vault::new(registry, SecretBackendType::Redis)), store)
}

/// Key provider serving a fixed set of key versions.
#[derive(Default)]
pub struct FixedKeys {
    keys: Mutex<HashMap<String, Vec<Key>>>,
}

impl FixedKeys {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Arc<Self> {
        let provider = Self::default();
        for key in keys {
            provider.add(key);
        }
        Arc::new(provider)
    }

    /// Add a version; the most recently added one is the latest.
    pub fn add(&self, key: Key) {
        self.keys.lock().unwrap().entry(key.name.clone()).or_default().push(key);
    }
}

#[async_trait]
impl KeyProvider for FixedKeys {
    async fn get_key(&self, name: &str) -> Result<Key> {
        self.keys
            .lock()
            .unwrap()
            .get(name)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| Error::secret_not_found(name))
    }

    async fn get_key_version(&self, name: &str, version: u64) -> Result<Key> {
        self.keys
            .lock()
            .unwrap()
            .get(name)
            .and_then(|versions| versions.iter().find(|k| k.version == version).cloned())
            .ok_or_else(|| Error::version_not_found(name, version))
    }
}
