//! Circuit breaker engine
//!
//! One [`BreakerEngine`] exists per protected-operation id, owned by the
//! [`EngineRegistry`](crate::EngineRegistry) for the lifetime of the process.
//! Callers ask for a [`CallPermit`] before dispatching work and report the
//! outcome through it; the engine transitions between closed, open, and
//! half-open based on the observed failure rate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::policy::BreakerPolicy;
use crate::state::{CircuitState, Transition};

/// Call admission rejections
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectedError {
    /// Circuit is open, calls are not allowed
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    /// Circuit is half-open and all probe permits are taken
    #[error("circuit breaker '{0}' is half-open with no probe permits available")]
    HalfOpenExhausted(String),
}

impl RejectedError {
    /// Id of the engine that rejected the call
    pub fn id(&self) -> &str {
        match self {
            Self::Open(id) | Self::HalfOpenExhausted(id) => id,
        }
    }
}

/// Transition hook callback type
pub type TransitionListener = Box<dyn Fn(&Transition) + Send + Sync>;

/// Mutable breaker bookkeeping, guarded by a single mutex
struct BreakerState {
    state: CircuitState,
    /// Most recent call outcomes, oldest first; `true` marks a failure
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes_issued: u32,
    probe_successes: u32,
    probe_failures: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            probes_issued: 0,
            probe_successes: 0,
            probe_failures: 0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        failures as f64 / self.window.len() as f64 * 100.0
    }

    /// Move to a new state, returning the transition to publish
    fn transition_to(&mut self, id: &str, to: CircuitState) -> Transition {
        let from = self.state;
        self.state = to;
        self.window.clear();
        self.probes_issued = 0;
        self.probe_successes = 0;
        self.probe_failures = 0;
        self.opened_at = match to {
            CircuitState::Open => Some(Instant::now()),
            _ => None,
        };
        Transition {
            id: id.to_string(),
            from,
            to,
        }
    }
}

/// Circuit breaker engine for a single protected-operation id
///
/// Thread safe; shared as `Arc<BreakerEngine>` between every caller of the
/// same id. The engine is constructed and configured once (transition hooks
/// are the configurable surface) and afterward mutated only through its own
/// internal synchronization.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fusegate_engine::{BreakerEngine, BreakerPolicy};
///
/// let engine = Arc::new(BreakerEngine::new("payments", BreakerPolicy::default()));
///
/// match engine.acquire() {
///     Ok(permit) => {
///         // dispatch the protected call, then report the outcome
///         permit.success();
///     }
///     Err(rejected) => {
///         // circuit is shedding load, fail fast
///         eprintln!("{rejected}");
///     }
/// }
/// ```
pub struct BreakerEngine {
    id: String,
    policy: BreakerPolicy,
    inner: Mutex<BreakerState>,
    listeners: RwLock<Vec<TransitionListener>>,
}

impl BreakerEngine {
    /// Create a new engine in the closed state
    pub fn new(id: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            id: id.into(),
            policy,
            inner: Mutex::new(BreakerState::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Id of the protected operation this engine guards
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The breaker policy this engine was constructed with
    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Register a transition-notification hook
    ///
    /// Every hook fires on every state change. Hooks run inline on the
    /// thread that caused the transition and must not block.
    pub fn on_transition<F>(&self, listener: F)
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    /// Ask for permission to dispatch a call
    ///
    /// In the closed state every call is admitted. In the open state calls
    /// are rejected until the wait duration elapses, after which the engine
    /// flips to half-open and admits a bounded number of probes. The permit
    /// must be used to report the call outcome; a permit dropped without an
    /// outcome counts as a failure.
    pub fn acquire(self: &Arc<Self>) -> Result<CallPermit, RejectedError> {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    return Ok(CallPermit::new(Arc::clone(self), false));
                }
                CircuitState::Open => {
                    let waited = inner
                        .opened_at
                        .map(|at| at.elapsed() >= self.policy.wait_in_open)
                        .unwrap_or(true);
                    if !waited {
                        return Err(RejectedError::Open(self.id.clone()));
                    }
                    let transition = inner.transition_to(&self.id, CircuitState::HalfOpen);
                    inner.probes_issued = 1;
                    transition
                }
                CircuitState::HalfOpen => {
                    if inner.probes_issued >= self.policy.half_open_probes {
                        return Err(RejectedError::HalfOpenExhausted(self.id.clone()));
                    }
                    inner.probes_issued += 1;
                    return Ok(CallPermit::new(Arc::clone(self), true));
                }
            }
        };

        self.notify(&transition);
        Ok(CallPermit::new(Arc::clone(self), true))
    }

    /// Force the engine back to the closed state and clear its window
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Closed {
                inner.window.clear();
                return;
            }
            inner.transition_to(&self.id, CircuitState::Closed)
        };
        self.notify(&transition);
    }

    /// Record a call outcome reported through a permit
    fn record(&self, probe: bool, failed: bool) {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    if inner.window.len() as u32 >= self.policy.sliding_window_size {
                        inner.window.pop_front();
                    }
                    inner.window.push_back(failed);

                    let enough = inner.window.len() as u32 >= self.policy.minimum_calls;
                    if enough && inner.failure_rate() >= self.policy.failure_rate_threshold {
                        let rate = inner.failure_rate();
                        let transition = inner.transition_to(&self.id, CircuitState::Open);
                        warn!(id = %self.id, failure_rate = rate, "circuit breaker opened");
                        transition
                    } else {
                        return;
                    }
                }
                CircuitState::HalfOpen => {
                    if !probe {
                        // Outcome of a call admitted before the circuit
                        // opened; only probe outcomes decide the round
                        debug!(id = %self.id, failed, "discarding non-probe outcome in half-open state");
                        return;
                    }
                    if failed {
                        inner.probe_failures += 1;
                    } else {
                        inner.probe_successes += 1;
                    }

                    let failed_share = inner.probe_failures as f64
                        / self.policy.half_open_probes as f64
                        * 100.0;
                    let completed = inner.probe_successes + inner.probe_failures;

                    if failed && failed_share >= self.policy.failure_rate_threshold {
                        // Enough probes already failed that the round cannot
                        // end below the threshold
                        let transition = inner.transition_to(&self.id, CircuitState::Open);
                        warn!(id = %self.id, "probe round failed, circuit breaker reopened");
                        transition
                    } else if completed >= self.policy.half_open_probes {
                        let transition = inner.transition_to(&self.id, CircuitState::Closed);
                        info!(id = %self.id, "probe round passed, circuit breaker closed");
                        transition
                    } else {
                        return;
                    }
                }
                CircuitState::Open => {
                    // A call admitted before the circuit opened finished late;
                    // its outcome no longer matters
                    debug!(id = %self.id, failed, "discarding late outcome in open state");
                    return;
                }
            }
        };

        self.notify(&transition);
    }

    fn notify(&self, transition: &Transition) {
        info!(
            id = %transition.id,
            from = %transition.from,
            to = %transition.to,
            "circuit breaker state transition"
        );
        for listener in self.listeners.read().iter() {
            listener(transition);
        }
    }
}

impl std::fmt::Debug for BreakerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerEngine")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Permit that must be held while a protected call runs
///
/// Report the outcome via [`success`](Self::success) or
/// [`failure`](Self::failure). Dropping the permit without reporting counts
/// as a failure so abandoned calls cannot keep the window from filling.
#[derive(Debug)]
pub struct CallPermit {
    engine: Arc<BreakerEngine>,
    probe: bool,
    recorded: bool,
}

impl CallPermit {
    fn new(engine: Arc<BreakerEngine>, probe: bool) -> Self {
        Self {
            engine,
            probe,
            recorded: false,
        }
    }

    /// Report that the call succeeded
    pub fn success(mut self) {
        self.record(false);
    }

    /// Report that the call failed or timed out
    pub fn failure(mut self) {
        self.record(true);
    }

    fn record(&mut self, failed: bool) {
        if !self.recorded {
            self.recorded = true;
            self.engine.record(self.probe, failed);
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.record(true);
    }
}
