//! The resilience factory
//!
//! Composes the configuration cache, default supplier, customizer registry,
//! engine registry, and worker pool. All state is held in the factory
//! instance itself - no hidden statics - so tests can construct isolated
//! factories per case.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument};

use fusegate_engine::EngineRegistry;

use crate::call::ProtectedCall;
use crate::config::{
    library_defaults, BreakerConfig, ConfigCache, ConfigError, DefaultConfigFn,
};
use crate::customize::{Customizer, CustomizerRegistry};
use crate::pool::WorkerPool;

/// Factory for fault-tolerance wrappers, keyed by protected-operation id
///
/// `create(id)` lazily resolves configuration, obtains or constructs the
/// shared engine instance (applying the matching customizer exactly once at
/// construction), and returns a ready-to-use [`ProtectedCall`]. Creation
/// never executes protected work.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fusegate::config::ConfigBuilder;
/// use fusegate::{BreakerPolicy, ResilienceFactory, TimeLimitPolicy};
///
/// let factory = ResilienceFactory::new();
///
/// // Defaults for ids without explicit configuration
/// factory.configure_default(|id| {
///     ConfigBuilder::new(id)
///         .breaker_policy(BreakerPolicy::default().with_sliding_window_size(10))
///         .time_limit_policy(TimeLimitPolicy::default().with_time_limit(Duration::from_secs(2)))
///         .build()
///         .unwrap_or_else(|_| fusegate::config::BreakerConfig::of_defaults(id))
/// });
///
/// let call = factory.create("inventory").unwrap();
/// assert_eq!(call.id(), "inventory");
/// ```
pub struct ResilienceFactory {
    registry: RwLock<Arc<EngineRegistry>>,
    pool: RwLock<Arc<WorkerPool>>,
    configs: ConfigCache,
    customizers: CustomizerRegistry,
    default_config: RwLock<DefaultConfigFn>,
}

impl Default for ResilienceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceFactory {
    /// Create a factory with library defaults and an unbounded worker pool
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Arc::new(EngineRegistry::new())),
            pool: RwLock::new(Arc::new(WorkerPool::default())),
            configs: ConfigCache::new(),
            customizers: CustomizerRegistry::new(),
            default_config: RwLock::new(library_defaults()),
        }
    }

    /// Replace the process-wide default configuration supplier
    ///
    /// Applies to ids not yet resolved; already-cached configurations are
    /// not recomputed.
    pub fn configure_default<F>(&self, supplier: F)
    where
        F: Fn(&str) -> BreakerConfig + Send + Sync + 'static,
    {
        *self.default_config.write() = Arc::new(supplier);
    }

    /// Replace the engine registry
    ///
    /// Engines already handed out keep running against the old registry;
    /// subsequent `create` calls resolve through the replacement.
    pub fn configure_registry(&self, registry: Arc<EngineRegistry>) {
        *self.registry.write() = registry;
    }

    /// Replace the worker pool
    pub fn configure_worker_pool(&self, pool: Arc<WorkerPool>) {
        *self.pool.write() = pool;
    }

    /// Register an explicit configuration for one id
    ///
    /// Fails with [`ConfigError::AlreadyResolved`] once the id has a
    /// published configuration (the cache is write-once per id).
    pub fn register_configuration(&self, config: BreakerConfig) -> Result<(), ConfigError> {
        if config.id().trim().is_empty() {
            return Err(ConfigError::InvalidId);
        }
        self.configs.insert(config)
    }

    /// Associate a customizer with one or more ids
    ///
    /// Customization happens only at engine construction: registering after
    /// the engine for an id exists has no effect on that instance.
    pub fn register_customizer<I, S>(&self, customizer: Customizer, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.customizers.register(customizer, ids);
    }

    /// The engine registry currently in use
    pub fn engine_registry(&self) -> Arc<EngineRegistry> {
        Arc::clone(&self.registry.read())
    }

    /// The worker pool currently in use
    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool.read())
    }

    /// Create a fault-tolerance wrapper for `id`
    ///
    /// Resolves configuration through the cache (default supplier on a
    /// miss), obtains or constructs the shared engine, and applies the
    /// matching customizer exactly once inside engine construction - warm
    /// reuse skips customization. An empty or blank id fails without
    /// creating any cache or registry entry.
    #[instrument(skip(self))]
    pub fn create(&self, id: &str) -> Result<ProtectedCall, ConfigError> {
        if id.trim().is_empty() {
            return Err(ConfigError::InvalidId);
        }

        let supplier = Arc::clone(&self.default_config.read());
        let config = self.configs.resolve(id, &supplier);

        let registry = self.engine_registry();
        let (engine, created) = registry.get_or_create(id, config.breaker_policy(), |engine| {
            if let Some(customizer) = self.customizers.lookup(id) {
                debug!(%id, "applying customizer to new engine");
                customizer.apply(engine);
            }
        });
        if created {
            debug!(%id, "engine constructed for protected operation");
        }

        Ok(ProtectedCall::new(
            id,
            config.time_limit_policy().clone(),
            engine,
            self.worker_pool(),
        ))
    }
}

impl std::fmt::Debug for ResilienceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceFactory")
            .field("configs", &self.configs.len())
            .field("customizers", &self.customizers.len())
            .field("engines", &self.registry.read().len())
            .finish()
    }
}
