//! Process-wide registry of live breaker engines
//!
//! Engines are keyed by protected-operation id, created lazily, and shared
//! by every caller of the same id. The registry guarantees at most one
//! engine is ever published per id regardless of call interleaving.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::engine::BreakerEngine;
use crate::policy::BreakerPolicy;

/// Registry of [`BreakerEngine`] instances
///
/// # Example
///
/// ```
/// use fusegate_engine::{BreakerPolicy, EngineRegistry};
///
/// let registry = EngineRegistry::new();
/// let (engine, created) =
///     registry.get_or_create("payments", &BreakerPolicy::default(), |_| {});
/// assert!(created);
///
/// let (same, created) =
///     registry.get_or_create("payments", &BreakerPolicy::default(), |_| {});
/// assert!(!created);
/// assert!(std::sync::Arc::ptr_eq(&engine, &same));
/// ```
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: DashMap<String, Arc<BreakerEngine>>,
}

impl EngineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the engine for `id`, constructing it if absent
    ///
    /// Returns the shared engine and whether this call constructed it. The
    /// `init` closure runs exactly once, on the freshly built engine, before
    /// any other caller can observe it; warm lookups never rerun it. Two
    /// tasks racing on the same id observe the same engine instance.
    pub fn get_or_create<F>(
        &self,
        id: &str,
        policy: &BreakerPolicy,
        init: F,
    ) -> (Arc<BreakerEngine>, bool)
    where
        F: FnOnce(&BreakerEngine),
    {
        let mut created = false;
        let engine = self
            .engines
            .entry(id.to_string())
            .or_insert_with(|| {
                created = true;
                let engine = Arc::new(BreakerEngine::new(id, policy.clone()));
                init(&engine);
                debug!(%id, "constructed circuit breaker engine");
                engine
            })
            .clone();
        (engine, created)
    }

    /// Look up the engine for `id` without creating one
    pub fn get(&self, id: &str) -> Option<Arc<BreakerEngine>> {
        self.engines.get(id).map(|entry| Arc::clone(&entry))
    }

    /// Check whether an engine exists for `id`
    pub fn contains(&self, id: &str) -> bool {
        self.engines.contains_key(id)
    }

    /// Ids of all live engines
    pub fn ids(&self) -> Vec<String> {
        self.engines.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove the engine for `id`, returning it if present
    ///
    /// Wrappers already holding the engine keep working against the removed
    /// instance; the next `get_or_create` for the id builds a fresh one.
    pub fn remove(&self, id: &str) -> Option<Arc<BreakerEngine>> {
        self.engines.remove(id).map(|(_, engine)| engine)
    }

    /// Number of live engines
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
