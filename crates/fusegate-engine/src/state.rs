//! Circuit breaker states and transitions

use serde::{Deserialize, Serialize};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure rate exceeded - all calls rejected
    Open,

    /// Testing if the protected operation recovered - limited calls allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A state transition, delivered to registered transition hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Id of the engine that transitioned
    pub id: String,
    /// State before the transition
    pub from: CircuitState,
    /// State after the transition
    pub to: CircuitState,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.id, self.from, self.to)
    }
}
