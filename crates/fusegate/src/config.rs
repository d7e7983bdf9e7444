//! Per-id configuration: value, builder, default supplier, and cache
//!
//! A [`BreakerConfig`] pairs a breaker policy with a time-limit policy for
//! one protected-operation id. Configurations are resolved at most once per
//! id: explicitly registered values win, otherwise the installed default
//! supplier computes one on first use and the result is memoized for the
//! process lifetime.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use fusegate_engine::{BreakerPolicy, PolicyError, TimeLimitPolicy};

/// Construction-time configuration errors
///
/// These always propagate to the caller of `build`/`create`; the factory
/// never silently substitutes defaults for an invalid value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Ids must be non-empty and non-blank
    #[error("a circuit breaker must have a non-empty id")]
    InvalidId,

    /// A supplied policy failed validation
    #[error("invalid configuration for '{id}': {source}")]
    InvalidConfiguration {
        /// The id the configuration was built for
        id: String,
        /// The failing policy check
        #[source]
        source: PolicyError,
    },

    /// The id already has a published configuration
    #[error("configuration for '{0}' is already resolved")]
    AlreadyResolved(String),
}

/// Immutable configuration for one protected-operation id
///
/// Created once per id, either registered explicitly or derived from the
/// default supplier, and never mutated afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    id: String,
    breaker: BreakerPolicy,
    time_limit: TimeLimitPolicy,
}

impl BreakerConfig {
    /// Build a configuration from library-default policies
    pub fn of_defaults(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            breaker: BreakerPolicy::default(),
            time_limit: TimeLimitPolicy::default(),
        }
    }

    /// The id this configuration is bound to
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The breaker policy
    pub fn breaker_policy(&self) -> &BreakerPolicy {
        &self.breaker
    }

    /// The time-limit policy
    pub fn time_limit_policy(&self) -> &TimeLimitPolicy {
        &self.time_limit
    }
}

/// Fluent builder for a [`BreakerConfig`]
///
/// Unset policies fall back to library defaults; supplied policies are
/// validated at [`build`](Self::build).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fusegate::config::ConfigBuilder;
/// use fusegate::{BreakerPolicy, TimeLimitPolicy};
///
/// let config = ConfigBuilder::new("inventory")
///     .breaker_policy(BreakerPolicy::default().with_sliding_window_size(10))
///     .time_limit_policy(TimeLimitPolicy::default().with_time_limit(Duration::from_secs(2)))
///     .build()
///     .unwrap();
/// assert_eq!(config.id(), "inventory");
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    id: String,
    breaker: Option<BreakerPolicy>,
    time_limit: Option<TimeLimitPolicy>,
}

impl ConfigBuilder {
    /// Start a builder bound to `id`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            breaker: None,
            time_limit: None,
        }
    }

    /// Set the breaker policy
    pub fn breaker_policy(mut self, policy: BreakerPolicy) -> Self {
        self.breaker = Some(policy);
        self
    }

    /// Set the time-limit policy
    pub fn time_limit_policy(mut self, policy: TimeLimitPolicy) -> Self {
        self.time_limit = Some(policy);
        self
    }

    /// Produce the immutable configuration value
    pub fn build(self) -> Result<BreakerConfig, ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidId);
        }

        let breaker = self.breaker.unwrap_or_default();
        breaker
            .validate()
            .map_err(|source| ConfigError::InvalidConfiguration {
                id: self.id.clone(),
                source,
            })?;

        let time_limit = self.time_limit.unwrap_or_default();
        time_limit
            .validate()
            .map_err(|source| ConfigError::InvalidConfiguration {
                id: self.id.clone(),
                source,
            })?;

        Ok(BreakerConfig {
            id: self.id,
            breaker,
            time_limit,
        })
    }
}

/// Replaceable default supplier: `id -> BreakerConfig`
///
/// Must be safe to call concurrently for different ids. The cache ensures
/// at most one supplied value is ever published per id.
pub type DefaultConfigFn = Arc<dyn Fn(&str) -> BreakerConfig + Send + Sync>;

/// The library default supplier
pub fn library_defaults() -> DefaultConfigFn {
    Arc::new(|id| BreakerConfig::of_defaults(id))
}

/// Memoized per-id configuration store
///
/// Population is write-once per id: `resolve` computes through the supplier
/// at most once, `insert` registers an explicit configuration and fails if
/// the id already resolved. Replacing the default supplier never changes a
/// published configuration.
#[derive(Debug, Default)]
pub struct ConfigCache {
    configs: DashMap<String, Arc<BreakerConfig>>,
}

impl ConfigCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the configuration for `id`, computing it via `supplier` on a miss
    ///
    /// Compute-if-absent: concurrent callers for the same id all observe the
    /// same published value.
    pub fn resolve(&self, id: &str, supplier: &DefaultConfigFn) -> Arc<BreakerConfig> {
        self.configs
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(%id, "resolving configuration via default supplier");
                Arc::new(supplier(id))
            })
            .clone()
    }

    /// Register an explicit configuration for its id
    pub fn insert(&self, config: BreakerConfig) -> Result<(), ConfigError> {
        match self.configs.entry(config.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ConfigError::AlreadyResolved(config.id().to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                debug!(id = %config.id(), "registered explicit configuration");
                vacant.insert(Arc::new(config));
                Ok(())
            }
        }
    }

    /// Look up a published configuration without computing one
    pub fn get(&self, id: &str) -> Option<Arc<BreakerConfig>> {
        self.configs.get(id).map(|entry| Arc::clone(&entry))
    }

    /// Check whether `id` has a published configuration
    pub fn contains(&self, id: &str) -> bool {
        self.configs.contains_key(id)
    }

    /// Number of published configurations
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
