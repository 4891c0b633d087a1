//! Backend registry: maps identifiers to adapter factories.

use crate::adapter::StorageAdapter;
use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::memory::MemoryStore;
use crate::sqlite::SqliteAdapter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Produces a fresh adapter over one configured store.
///
/// Every adapter a factory yields talks to the same database, so a server
/// can hand one adapter to each request.
pub type AdapterFactory = Arc<dyn Fn() -> AdapterResult<Box<dyn StorageAdapter>> + Send + Sync>;

/// Builds a factory from configuration.
pub type FactoryBuilder = Arc<dyn Fn(&AdapterConfig) -> AdapterResult<AdapterFactory> + Send + Sync>;

/// Registry of backends by identifier, resolved at startup.
///
/// # Example
///
/// ```rust
/// use rowsync_storage::{AdapterConfig, AdapterRegistry};
///
/// let registry = AdapterRegistry::with_defaults();
/// let factory = registry.resolve(&AdapterConfig::memory()).unwrap();
/// let adapter = factory().unwrap();
/// assert_eq!(adapter.backend(), "memory");
/// ```
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    builders: BTreeMap<String, FactoryBuilder>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the `memory` and `sqlite` backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |config: &AdapterConfig| {
            let store = MemoryStore::new();
            let suffix = config.metadata_suffix.clone();
            let factory: AdapterFactory =
                Arc::new(move || -> AdapterResult<Box<dyn StorageAdapter>> {
                    Ok(Box::new(
                        store.adapter().with_metadata_suffix(suffix.clone()),
                    ))
                });
            Ok(factory)
        });
        registry.register("sqlite", SqliteAdapter::factory);
        registry
    }

    /// Registers (or replaces) a backend.
    pub fn register<F>(&mut self, backend: impl Into<String>, builder: F)
    where
        F: Fn(&AdapterConfig) -> AdapterResult<AdapterFactory> + Send + Sync + 'static,
    {
        self.builders.insert(backend.into(), Arc::new(builder));
    }

    /// Returns the registered backend identifiers.
    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Resolves the configured backend to a factory.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Instantiation`] for an unknown identifier or
    /// a backend that cannot be set up.
    pub fn resolve(&self, config: &AdapterConfig) -> AdapterResult<AdapterFactory> {
        let builder = self.builders.get(&config.backend).ok_or_else(|| {
            AdapterError::Instantiation(format!("unknown backend '{}'", config.backend))
        })?;
        debug!(backend = %config.backend, "resolving adapter factory");
        builder(config)
    }

    /// Resolves the configured backend and opens one adapter.
    pub fn open(&self, config: &AdapterConfig) -> AdapterResult<Box<dyn StorageAdapter>> {
        let factory = self.resolve(config)?;
        factory()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("backends", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}
