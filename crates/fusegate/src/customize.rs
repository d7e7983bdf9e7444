//! One-shot post-construction engine customization
//!
//! A customizer mutates/configures an already-constructed engine for one id
//! (typically by registering transition hooks). It is applied exactly once,
//! immediately after engine construction, before the instance is handed to
//! any caller. Registering a customizer for an id whose engine already
//! exists has no effect on the existing instance - customization happens
//! only at construction time.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use fusegate_engine::BreakerEngine;

/// A post-construction mutation applied to a breaker engine
///
/// Cheap to clone; one customizer instance may be shared across many ids.
///
/// # Example
///
/// ```
/// use fusegate::Customizer;
///
/// let customizer = Customizer::new(|engine| {
///     engine.on_transition(|transition| println!("{transition}"));
/// });
/// ```
#[derive(Clone)]
pub struct Customizer {
    apply: Arc<dyn Fn(&BreakerEngine) + Send + Sync>,
}

impl Customizer {
    /// Wrap a customization function
    pub fn new<F>(apply: F) -> Self
    where
        F: Fn(&BreakerEngine) + Send + Sync + 'static,
    {
        Self {
            apply: Arc::new(apply),
        }
    }

    /// Apply the customization to an engine
    pub fn apply(&self, engine: &BreakerEngine) {
        (self.apply)(engine);
    }
}

impl fmt::Debug for Customizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Customizer").finish_non_exhaustive()
    }
}

/// Mapping from id to customizer
///
/// Each id maps to at most one customizer; re-registration overwrites
/// (last-registration-wins, no composition). Absence of a customizer is a
/// normal outcome, not an error.
#[derive(Debug, Default)]
pub struct CustomizerRegistry {
    customizers: DashMap<String, Customizer>,
}

impl CustomizerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate one customizer with one or more ids
    pub fn register<I, S>(&self, customizer: Customizer, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.customizers.insert(id.into(), customizer.clone());
        }
    }

    /// Return the customizer for `id`, if one is registered
    pub fn lookup(&self, id: &str) -> Option<Customizer> {
        self.customizers.get(id).map(|entry| entry.clone())
    }

    /// Number of registered ids
    pub fn len(&self) -> usize {
        self.customizers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.customizers.is_empty()
    }
}
