//! Worker pool for protected-call execution
//!
//! Protected work is dispatched onto the tokio runtime through a shared
//! pool so a timeout can preempt a stuck call at the dispatch boundary.
//! The pool bounds concurrency with a semaphore (or runs unbounded) and
//! carries a pool-wide cancellation token that per-call tokens derive from,
//! so shutting the pool down signals every in-flight cooperative operation.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent protected calls (`None` = unbounded)
    pub max_concurrency: Option<usize>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
        }
    }
}

impl WorkerPoolConfig {
    /// Create an unbounded pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the pool to at most `max` concurrent calls
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// Remove the concurrency bound
    pub fn unbounded(mut self) -> Self {
        self.max_concurrency = None;
        self
    }
}

/// Shared pool of execution contexts for protected calls
///
/// The pool itself is stateless beyond its bound and shutdown token; work
/// runs as plain tokio tasks. The semaphore permit is acquired inside the
/// spawned task so a caller-side timeout also preempts queue wait.
#[derive(Debug)]
pub struct WorkerPool {
    config: WorkerPoolConfig,
    limiter: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(WorkerPoolConfig::default())
    }
}

impl WorkerPool {
    /// Create a pool from configuration
    pub fn new(config: WorkerPoolConfig) -> Self {
        let limiter = config
            .max_concurrency
            .map(|max| Arc::new(Semaphore::new(max)));
        Self {
            config,
            limiter,
            shutdown: CancellationToken::new(),
        }
    }

    /// The pool configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Derive a per-call cancellation token
    ///
    /// The token is cancelled when its call times out or when the pool
    /// shuts down, whichever first.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Submit work for execution, returning its handle
    ///
    /// With a bounded pool the future waits for a permit inside the spawned
    /// task; cancelling or aborting the handle releases the slot.
    pub fn submit<T>(&self, future: impl Future<Output = T> + Send + 'static) -> JoinHandle<T>
    where
        T: Send + 'static,
    {
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let _permit = match limiter {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            future.await
        })
    }

    /// Cancel the pool-wide token so in-flight cooperative work winds down
    pub fn shutdown(&self) {
        info!("worker pool shutting down");
        self.shutdown.cancel();
    }

    /// Check whether the pool has been shut down
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
