//! Lazy, cached driver registry
//!
//! A [`DriverRegistry`] maps a driver kind to a factory. The first
//! [`DriverRegistry::resolve`] for a kind runs its factory and every later
//! call returns the same instance. Concurrent first resolves of one kind share
//! a single factory invocation. A failed construction is not remembered, so
//! the next resolve runs the factory again.

use crate::errors::{Error, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Future returned by a driver factory.
pub type FactoryFuture<D> = BoxFuture<'static, Result<D>>;

type CreateFn<D> = Arc<dyn Fn() -> FactoryFuture<D> + Send + Sync>;

/// Constructor for one driver kind.
pub struct DriverFactory<K, D> {
    provides: K,
    optional: bool,
    create: CreateFn<D>,
}

impl<K, D> DriverFactory<K, D> {
    /// A factory whose failure aborts [`DriverRegistry::all`].
    pub fn new<F, Fut>(provides: K, create: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D>> + Send + 'static,
    {
        let create: CreateFn<D> = Arc::new(move || -> FactoryFuture<D> { Box::pin(create()) });
        Self { provides, optional: false, create }
    }

    /// A factory that [`DriverRegistry::all`] skips when it fails.
    pub fn optional<F, Fut>(provides: K, create: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D>> + Send + 'static,
    {
        Self { optional: true, ..Self::new(provides, create) }
    }

    pub fn provides(&self) -> &K {
        &self.provides
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

impl<K: fmt::Debug, D> fmt::Debug for DriverFactory<K, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFactory")
            .field("provides", &self.provides)
            .field("optional", &self.optional)
            .finish()
    }
}

struct Entry<D> {
    optional: bool,
    create: CreateFn<D>,
    instance: OnceCell<D>,
}

/// Registry of lazily constructed drivers.
///
/// Drivers are handed out by clone, so `D` is normally an `Arc` of a trait
/// object. Instances live as long as the registry; there is no eviction.
pub struct DriverRegistry<K, D> {
    order: Vec<K>,
    entries: HashMap<K, Entry<D>>,
}

impl<K, D> fmt::Debug for DriverRegistry<K, D>
where
    K: fmt::Debug + Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved: Vec<&K> = self
            .order
            .iter()
            .filter(|k| self.entries.get(*k).is_some_and(|e| e.instance.initialized()))
            .collect();
        f.debug_struct("DriverRegistry")
            .field("registered", &self.order)
            .field("resolved", &resolved)
            .finish()
    }
}

impl<K, D> Default for DriverRegistry<K, D> {
    fn default() -> Self {
        Self { order: Vec::new(), entries: HashMap::new() }
    }
}

impl<K, D> DriverRegistry<K, D>
where
    K: Clone + Eq + Hash + fmt::Display,
    D: Clone + Send + Sync,
{
    /// Build a registry from a set of factories. A later factory for the
    /// same kind replaces an earlier one.
    pub fn new(factories: impl IntoIterator<Item = DriverFactory<K, D>>) -> Self {
        let mut registry = Self::default();
        for factory in factories {
            registry.register(factory);
        }
        registry
    }

    /// Register a factory, replacing any existing factory for the same kind
    /// along with its cached instance.
    pub fn register(&mut self, factory: DriverFactory<K, D>) {
        let DriverFactory { provides, optional, create } = factory;
        let entry = Entry { optional, create, instance: OnceCell::new() };

        if self.entries.insert(provides.clone(), entry).is_some() {
            warn!(driver = %provides, "Replacing previously registered driver factory");
        } else {
            info!(driver = %provides, optional, "Registering driver factory");
            self.order.push(provides);
        }
    }

    /// Check if a factory is registered for a kind
    pub fn is_registered(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered kinds in registration order
    pub fn registered_keys(&self) -> Vec<K> {
        self.order.clone()
    }

    /// Check if a kind has already been constructed
    pub fn is_resolved(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|e| e.instance.initialized())
    }

    /// Return the instance for `key`, constructing it on first use.
    pub async fn resolve(&self, key: &K) -> Result<D> {
        let entry = self.entries.get(key).ok_or_else(|| Error::driver_not_found(key))?;

        let driver = entry
            .instance
            .get_or_try_init(|| {
                debug!(driver = %key, "Constructing driver");
                (entry.create)()
            })
            .await?;

        Ok(driver.clone())
    }

    /// Resolve every registered kind in registration order.
    ///
    /// A failing optional factory is skipped. A failing required factory
    /// aborts the call with the error it raised.
    pub async fn all(&self) -> Result<Vec<D>> {
        let mut drivers = Vec::with_capacity(self.order.len());

        for key in &self.order {
            match self.resolve(key).await {
                Ok(driver) => drivers.push(driver),
                Err(e) if self.entries.get(key).is_some_and(|entry| entry.optional) => {
                    debug!(driver = %key, error = %e, "Skipping optional driver");
                }
                Err(e) => {
                    error!(driver = %key, error = %e, "Failed to resolve required driver");
                    return Err(e);
                }
            }
        }

        Ok(drivers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn counting_factory(
        key: &'static str,
        calls: Arc<AtomicUsize>,
    ) -> DriverFactory<&'static str, Arc<String>> {
        DriverFactory::new(key, move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Arc::new(format!("{}-driver", key)))
            }
        })
    }

    #[tokio::test]
    async fn test_resolve_caches_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = DriverRegistry::new([counting_factory("redis", calls.clone())]);

        assert!(!registry.is_resolved(&"redis"));
        let first = registry.resolve(&"redis").await.unwrap();
        let second = registry.resolve(&"redis").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_resolved(&"redis"));
    }

    #[tokio::test]
    async fn test_concurrent_first_resolve_runs_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(DriverRegistry::new([counting_factory("gcp", calls.clone())]));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.resolve(&"gcp").await.unwrap() })
            })
            .collect();

        let mut drivers = Vec::new();
        for handle in handles {
            drivers.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(drivers.iter().all(|d| Arc::ptr_eq(d, &drivers[0])));
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let registry: DriverRegistry<&'static str, Arc<String>> = DriverRegistry::default();
        let err = registry.resolve(&"nope").await.unwrap_err();
        assert!(matches!(err, Error::DriverNotFound { ref driver } if driver == "nope"));
    }

    #[tokio::test]
    async fn test_failed_construction_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = DriverRegistry::new([DriverFactory::new("flaky", move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(Error::backend_unavailable("connection refused"))
                } else {
                    Ok(Arc::new("ok".to_string()))
                }
            }
        })]);

        let err = registry.resolve(&"flaky").await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
        assert!(!registry.is_resolved(&"flaky"));

        let driver = registry.resolve(&"flaky").await.unwrap();
        assert_eq!(driver.as_str(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_duplicate_registration_last_wins() {
        let registry = DriverRegistry::new([
            DriverFactory::new("redis", || async { Ok(Arc::new("first".to_string())) }),
            DriverFactory::new("redis", || async { Ok(Arc::new("second".to_string())) }),
        ]);

        assert_eq!(registry.registered_keys(), vec!["redis"]);
        assert_eq!(registry.resolve(&"redis").await.unwrap().as_str(), "second");
        assert!(logs_contain("Replacing previously registered driver factory"));
    }

    #[tokio::test]
    async fn test_all_skips_failing_optional() {
        let registry = DriverRegistry::new([
            DriverFactory::new("a", || async { Ok(Arc::new("a".to_string())) }),
            DriverFactory::optional("b", || async {
                Err::<Arc<String>, _>(Error::config("missing section"))
            }),
            DriverFactory::new("c", || async { Ok(Arc::new("c".to_string())) }),
        ]);

        let drivers = registry.all().await.unwrap();
        let names: Vec<&str> = drivers.iter().map(|d| d.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_all_aborts_on_required_failure() {
        let registry = DriverRegistry::new([
            DriverFactory::new("a", || async { Ok(Arc::new("a".to_string())) }),
            DriverFactory::new("b", || async {
                Err::<Arc<String>, _>(Error::config("missing section"))
            }),
        ]);

        let err = registry.all().await.unwrap_err();
        assert!(matches!(err, Error::Config { ref message } if message == "missing section"));
        assert!(logs_contain("Failed to resolve required driver"));
    }

    #[test]
    fn test_factory_flags() {
        let required: DriverFactory<&str, Arc<String>> =
            DriverFactory::new("a", || async { Ok(Arc::new(String::new())) });
        let optional: DriverFactory<&str, Arc<String>> =
            DriverFactory::optional("b", || async { Ok(Arc::new(String::new())) });

        assert!(!required.is_optional());
        assert!(optional.is_optional());
        assert_eq!(*optional.provides(), "b");
    }
}
