//! Protected call wrapper
//!
//! [`ProtectedCall`] is the short-lived value the factory hands out per
//! `create(id)` invocation. It wraps the id, the resolved time-limit
//! policy, the shared engine instance, and the shared worker pool; the
//! wrapper itself is stateless and safe to discard after use.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fusegate_engine::{BreakerEngine, CircuitState, TimeLimitPolicy};

use crate::pool::WorkerPool;

/// Execution-time errors for a protected call
///
/// All variants are expected/recoverable and are routed to the fallback
/// when one is supplied; without a fallback they propagate unchanged. The
/// wrapped operation's own error passes through in
/// [`Operation`](Self::Operation) untransformed.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker is shedding load; the operation was never dispatched
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// The operation exceeded the time limit
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation itself failed
    #[error("operation failed: {0}")]
    Operation(#[source] E),

    /// The dispatched task panicked or was aborted before completing
    #[error("protected task did not complete: {0}")]
    TaskFailed(#[source] tokio::task::JoinError),
}

impl<E> CallError<E> {
    /// Whether the call was rejected by an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Whether the call exceeded its time limit
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// A ready-to-use fault-tolerance wrapper for one protected operation
///
/// Cheap to clone and discard; repeated `create(id)` calls on the factory
/// yield wrappers sharing the same underlying engine instance.
///
/// # Example
///
/// ```
/// use fusegate::{CallError, ResilienceFactory};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let factory = ResilienceFactory::new();
/// let call = factory.create("greeter").unwrap();
///
/// let greeting = call
///     .run_with_fallback(
///         |_cancel| async { Ok::<_, std::io::Error>("hello".to_string()) },
///         |_err: CallError<std::io::Error>| "fallback".to_string(),
///     )
///     .await;
/// assert_eq!(greeting, "hello");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ProtectedCall {
    id: String,
    time_limit: TimeLimitPolicy,
    engine: Arc<BreakerEngine>,
    pool: Arc<WorkerPool>,
}

impl ProtectedCall {
    pub(crate) fn new(
        id: impl Into<String>,
        time_limit: TimeLimitPolicy,
        engine: Arc<BreakerEngine>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            id: id.into(),
            time_limit,
            engine,
            pool,
        }
    }

    /// The protected-operation id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The resolved time-limit policy
    pub fn time_limit(&self) -> &TimeLimitPolicy {
        &self.time_limit
    }

    /// The shared engine instance supervising this operation
    pub fn engine(&self) -> &Arc<BreakerEngine> {
        &self.engine
    }

    /// Current breaker state
    pub fn state(&self) -> CircuitState {
        self.engine.state()
    }

    /// Execute `operation` under the breaker's supervision
    ///
    /// The operation receives a [`CancellationToken`] it must observe for
    /// cooperative cancellation; the token fires when the call times out or
    /// the pool shuts down. If the breaker is open the operation is never
    /// dispatched. Dispatched work is bounded by the time-limit policy: on
    /// expiry the token is cancelled, the task aborted when the policy says
    /// to, and a failure outcome is recorded. Success and failure outcomes
    /// feed the engine's sliding window.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let permit = self.engine.acquire().map_err(|rejected| {
            warn!(id = %self.id, %rejected, "call rejected without dispatch");
            CallError::CircuitOpen(rejected.id().to_string())
        })?;

        let token = self.pool.child_token();
        let mut handle = self.pool.submit(operation(token.clone()));
        let limit = self.time_limit.time_limit;

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(Ok(value))) => {
                permit.success();
                Ok(value)
            }
            Ok(Ok(Err(err))) => {
                permit.failure();
                Err(CallError::Operation(err))
            }
            Ok(Err(join_err)) => {
                permit.failure();
                Err(CallError::TaskFailed(join_err))
            }
            Err(_elapsed) => {
                token.cancel();
                if self.time_limit.cancel_on_timeout {
                    handle.abort();
                }
                permit.failure();
                warn!(id = %self.id, ?limit, "protected call timed out");
                Err(CallError::Timeout(limit))
            }
        }
    }

    /// Execute `operation`, consuming any execution-time error with `fallback`
    ///
    /// The fallback receives the triggering [`CallError`]; the operation's
    /// own error arrives unchanged inside [`CallError::Operation`].
    pub async fn run_with_fallback<T, E, F, Fut, FB>(&self, operation: F, fallback: FB) -> T
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        FB: FnOnce(CallError<E>) -> T,
        T: Send + 'static,
        E: Send + 'static,
    {
        match self.run(operation).await {
            Ok(value) => value,
            Err(err) => {
                debug!(id = %self.id, "routing execution error to fallback");
                fallback(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use fusegate_engine::BreakerPolicy;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn test_call(time_limit: TimeLimitPolicy) -> ProtectedCall {
        let policy = BreakerPolicy::default()
            .with_failure_rate_threshold(50.0)
            .with_sliding_window_size(4)
            .with_minimum_calls(2)
            .with_wait_in_open(Duration::from_millis(50));
        ProtectedCall::new(
            "test_service",
            time_limit,
            Arc::new(BreakerEngine::new("test_service", policy)),
            Arc::new(WorkerPool::default()),
        )
    }

    #[tokio::test]
    async fn test_success_returns_value_unwrapped() {
        let call = test_call(TimeLimitPolicy::default());
        let value = call
            .run(|_cancel| async { Ok::<_, Boom>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(call.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let call = test_call(TimeLimitPolicy::default());
        let err = call
            .run(|_cancel| async { Err::<u32, _>(Boom) })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Operation(Boom)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let call = test_call(TimeLimitPolicy::new().with_time_limit(Duration::from_millis(30)));
        let err = call
            .run(|_cancel| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok::<_, Boom>(0)
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, CallError::Timeout(limit) if limit == Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn test_timeout_cancels_cooperatively() {
        let call = test_call(
            TimeLimitPolicy::new()
                .with_time_limit(Duration::from_millis(30))
                .with_cancel_on_timeout(false),
        );
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);

        let err = call
            .run(move |cancel| async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        flag.store(true, Ordering::SeqCst);
                        Err::<u32, _>(Boom)
                    }
                    _ = tokio::time::sleep(Duration::from_secs(3)) => Ok(0),
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_open_circuit_never_dispatches() {
        let call = test_call(TimeLimitPolicy::default());
        for _ in 0..2 {
            let _ = call.run(|_cancel| async { Err::<u32, _>(Boom) }).await;
        }
        assert_eq!(call.state(), CircuitState::Open);

        let dispatched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dispatched);
        let err = call
            .run(move |_cancel| async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Boom>(0)
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert!(matches!(err, CallError::CircuitOpen(id) if id == "test_service"));
        assert!(!dispatched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeouts_count_toward_opening() {
        let call = test_call(TimeLimitPolicy::new().with_time_limit(Duration::from_millis(10)));
        for _ in 0..2 {
            let _ = call
                .run(|_cancel| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    Ok::<_, Boom>(0)
                })
                .await;
        }
        assert_eq!(call.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_panic_is_a_task_failure() {
        fn explode() -> Result<u32, Boom> {
            panic!("kaboom")
        }

        let call = test_call(TimeLimitPolicy::default());
        let err = call.run(|_cancel| async { explode() }).await.unwrap_err();
        assert!(matches!(err, CallError::TaskFailed(_)));
    }

    #[tokio::test]
    async fn test_fallback_consumes_errors() {
        let call = test_call(TimeLimitPolicy::default());
        let fallback_calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fallback_calls);
        let value = call
            .run_with_fallback(
                |_cancel| async { Err::<u32, _>(Boom) },
                move |err| {
                    assert!(matches!(err, CallError::Operation(Boom)));
                    counter.fetch_add(1, Ordering::SeqCst);
                    99
                },
            )
            .await;

        assert_eq!(value, 99);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_not_invoked_on_success() {
        let call = test_call(TimeLimitPolicy::default());
        let value = call
            .run_with_fallback(
                |_cancel| async { Ok::<_, Boom>(5) },
                |_err| unreachable!("fallback must not run on success"),
            )
            .await;
        assert_eq!(value, 5);
    }
}
