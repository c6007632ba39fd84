//! Vault façade over the configured secret backend.
//!
//! Every operation resolves the default backend through a [`DriverRegistry`]
//! and forwards to it unchanged. Backends are constructed on first use, so a
//! misconfigured backend that is never selected costs nothing.

use super::backends::{
    CacheSecretBackend, HcpVaultSecretBackend, InfisicalSecretBackend, SecretBackend,
    SecretBackendType,
};
use super::types::Secret;
use crate::config::VaultConfig;
use crate::driver::{DriverFactory, DriverRegistry};
use crate::errors::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Registry of secret backends keyed by kind.
pub type BackendRegistry = DriverRegistry<SecretBackendType, Arc<dyn SecretBackend>>;

/// Factory for one backend kind.
pub type BackendFactory = DriverFactory<SecretBackendType, Arc<dyn SecretBackend>>;

fn missing_section(kind: SecretBackendType) -> Error {
    Error::config(format!("vault.{} configuration section is required", kind))
}

/// Wrap a per-kind constructor. Only the selected driver is required.
fn factory<C, F, Fut>(
    kind: SecretBackendType,
    required: bool,
    section: Option<C>,
    create: F,
) -> BackendFactory
where
    C: Clone + Send + Sync + 'static,
    F: Fn(C) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn SecretBackend>>> + Send + 'static,
{
    let build = move || {
        let section = section.clone();
        let create = create.clone();
        async move {
            let section = section.ok_or_else(|| missing_section(kind))?;
            create(section).await
        }
    };

    if required {
        DriverFactory::new(kind, build)
    } else {
        DriverFactory::optional(kind, build)
    }
}

#[cfg(feature = "gcp")]
async fn connect_gcp(
    section: crate::secrets::backends::GcpSecretManagerConfig,
) -> Result<Arc<dyn SecretBackend>> {
    Ok(Arc::new(super::backends::GcpSecretBackend::from_config(&section).await?))
}

#[cfg(not(feature = "gcp"))]
async fn connect_gcp(
    _section: crate::secrets::backends::GcpSecretManagerConfig,
) -> Result<Arc<dyn SecretBackend>> {
    Err(Error::config("strongbox was built without the `gcp` feature"))
}

async fn connect_infisical(
    section: crate::secrets::backends::InfisicalConfig,
) -> Result<Arc<dyn SecretBackend>> {
    Ok(Arc::new(InfisicalSecretBackend::from_config(&section).await?))
}

async fn connect_hcp_vault(
    section: crate::secrets::backends::HcpVaultConfig,
) -> Result<Arc<dyn SecretBackend>> {
    Ok(Arc::new(HcpVaultSecretBackend::from_config(&section).await?))
}

async fn connect_redis(
    section: crate::secrets::backends::RedisConfig,
) -> Result<Arc<dyn SecretBackend>> {
    Ok(Arc::new(CacheSecretBackend::from_config(&section).await?))
}

/// Build the factory for `kind` from its configuration section.
///
/// The factory fails with a configuration error when the section is absent,
/// so the failure surfaces on first resolve and is retried on the next.
pub fn backend_factory(kind: SecretBackendType, config: &VaultConfig) -> BackendFactory {
    let required = kind == config.driver;

    match kind {
        SecretBackendType::GcpSecretManager => {
            factory(kind, required, config.gcp_secret_manager.clone(), connect_gcp)
        }
        SecretBackendType::Infisical => {
            factory(kind, required, config.infisical.clone(), connect_infisical)
        }
        SecretBackendType::HcpVault => {
            factory(kind, required, config.hcp_vault.clone(), connect_hcp_vault)
        }
        SecretBackendType::Redis => factory(kind, required, config.redis.clone(), connect_redis),
    }
}

/// Versioned secret storage over a pluggable backend.
#[derive(Debug)]
pub struct Vault {
    registry: BackendRegistry,
    default_driver: SecretBackendType,
}

impl Vault {
    pub fn new(registry: BackendRegistry, default_driver: SecretBackendType) -> Self {
        Self { registry, default_driver }
    }

    /// Register a factory for every backend kind; `config.driver` is the
    /// default.
    pub fn from_config(config: &VaultConfig) -> Self {
        let registry = BackendRegistry::new(
            SecretBackendType::ALL.into_iter().map(|kind| backend_factory(kind, config)),
        );
        info!(driver = %config.driver, "Vault configured");
        Self::new(registry, config.driver)
    }

    pub fn default_driver(&self) -> SecretBackendType {
        self.default_driver
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Resolve a specific backend, bypassing the default.
    pub async fn driver(&self, kind: SecretBackendType) -> Result<Arc<dyn SecretBackend>> {
        self.registry.resolve(&kind).await
    }

    async fn backend(&self) -> Result<Arc<dyn SecretBackend>> {
        self.registry.resolve(&self.default_driver).await
    }

    #[instrument(level = "debug", skip(self, payload), fields(driver = %self.default_driver))]
    pub async fn create_secret(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.backend().await?.create_secret(name, payload).await
    }

    #[instrument(level = "debug", skip(self, payload), fields(driver = %self.default_driver))]
    pub async fn add_version(&self, name: &str, payload: &[u8]) -> Result<Secret> {
        self.backend().await?.add_version(name, payload).await
    }

    #[instrument(level = "debug", skip(self), fields(driver = %self.default_driver))]
    pub async fn get_version(&self, name: &str, version: u64) -> Result<Secret> {
        self.backend().await?.get_version(name, version).await
    }

    #[instrument(level = "debug", skip(self), fields(driver = %self.default_driver))]
    pub async fn get_latest_version(&self, name: &str) -> Result<Secret> {
        self.backend().await?.get_latest_version(name).await
    }

    #[instrument(level = "debug", skip(self), fields(driver = %self.default_driver))]
    pub async fn delete_secret(&self, name: &str) -> Result<()> {
        self.backend().await?.delete_secret(name).await
    }

    /// Tear down the default backend if it opted into [`BackendCloser`].
    ///
    /// A backend that was never constructed has nothing to release.
    ///
    /// [`BackendCloser`]: super::backends::BackendCloser
    pub async fn close(&self) -> Result<()> {
        if !self.registry.is_resolved(&self.default_driver) {
            debug!(driver = %self.default_driver, "Default backend never resolved, nothing to close");
            return Ok(());
        }

        let backend = self.backend().await?;
        match backend.closer() {
            Some(closer) => {
                closer.close().await?;
                info!(driver = %self.default_driver, "Closed secret backend");
            }
            None => debug!(driver = %self.default_driver, "Backend has no teardown"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::PepperCipher;
    use crate::secrets::backends::{BackendCloser, MemoryListStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn memory_backend() -> Arc<dyn SecretBackend> {
        let pepper = PepperCipher::new(vec![1u8; 32]).unwrap();
        Arc::new(CacheSecretBackend::new(Arc::new(MemoryListStore::new()), pepper))
    }

    fn memory_vault() -> Vault {
        let registry = BackendRegistry::new([DriverFactory::new(SecretBackendType::Redis, || async {
            Ok(memory_backend())
        })]);
        Vault::new(registry, SecretBackendType::Redis)
    }

    #[derive(Debug, Default)]
    struct ClosingBackend {
        closed: AtomicBool,
    }

    #[async_trait]
    impl SecretBackend for ClosingBackend {
        async fn create_secret(&self, name: &str, payload: &[u8]) -> Result<Secret> {
            Ok(Secret::new(name, 1, payload))
        }
        async fn add_version(&self, name: &str, payload: &[u8]) -> Result<Secret> {
            Ok(Secret::new(name, 2, payload))
        }
        async fn get_version(&self, name: &str, version: u64) -> Result<Secret> {
            Err(Error::version_not_found(name, version))
        }
        async fn get_latest_version(&self, name: &str) -> Result<Secret> {
            Err(Error::secret_not_found(name))
        }
        async fn delete_secret(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        fn backend_type(&self) -> SecretBackendType {
            SecretBackendType::GcpSecretManager
        }
        fn closer(&self) -> Option<&dyn BackendCloser> {
            Some(self)
        }
    }

    #[async_trait]
    impl BackendCloser for ClosingBackend {
        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_add_and_read_versions() {
        let vault = memory_vault();

        let created = vault.create_secret("foo", b"p1").await.unwrap();
        let added = vault.add_version("foo", b"p2").await.unwrap();
        assert_eq!((created.version, added.version), (1, 2));

        let latest = vault.get_latest_version("foo").await.unwrap();
        assert_eq!(latest, Secret::new("foo", 2, b"p2".to_vec()));

        let first = vault.get_version("foo", 1).await.unwrap();
        assert_eq!(first, Secret::new("foo", 1, b"p1".to_vec()));

        vault.delete_secret("foo").await.unwrap();
        assert!(vault.get_latest_version("foo").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unregistered_default_driver() {
        let vault = Vault::new(BackendRegistry::default(), SecretBackendType::HcpVault);
        let err = vault.get_latest_version("foo").await.unwrap_err();
        assert!(matches!(err, Error::DriverNotFound { ref driver } if driver == "hcp_vault"));
    }

    #[tokio::test]
    async fn test_explicit_driver_selection() {
        let vault = memory_vault();
        let backend = vault.driver(SecretBackendType::Redis).await.unwrap();
        assert_eq!(backend.backend_type(), SecretBackendType::Redis);
        assert!(vault.driver(SecretBackendType::Infisical).await.is_err());
    }

    #[tokio::test]
    async fn test_close_invokes_opt_in_teardown() {
        let backend = Arc::new(ClosingBackend::default());
        let shared = backend.clone();
        let registry =
            BackendRegistry::new([DriverFactory::new(SecretBackendType::GcpSecretManager, move || {
                let backend = shared.clone();
                async move { Ok(backend as Arc<dyn SecretBackend>) }
            })]);
        let vault = Vault::new(registry, SecretBackendType::GcpSecretManager);

        vault.close().await.unwrap();
        assert!(!backend.closed.load(Ordering::SeqCst), "unresolved backend must not be built");

        vault.create_secret("a", b"x").await.unwrap();
        vault.close().await.unwrap();
        assert!(backend.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_without_teardown_is_noop() {
        let vault = memory_vault();
        vault.create_secret("a", b"x").await.unwrap();
        vault.close().await.unwrap();
        assert_eq!(vault.get_latest_version("a").await.unwrap().payload, b"x");
    }

    #[tokio::test]
    async fn test_from_config_missing_section() {
        let config = VaultConfig { driver: SecretBackendType::HcpVault, ..Default::default() };
        let vault = Vault::from_config(&config);

        assert_eq!(vault.default_driver(), SecretBackendType::HcpVault);
        for kind in SecretBackendType::ALL {
            assert!(vault.registry().is_registered(&kind));
        }

        let err = vault.get_latest_version("foo").await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(!vault.registry().is_resolved(&SecretBackendType::HcpVault));
    }
}
