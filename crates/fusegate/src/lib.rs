//! # Fusegate
//!
//! A provider-neutral resilience factory: given an id naming a protected
//! operation, the factory lazily constructs, caches, and returns a
//! fault-tolerance wrapper (circuit breaker plus time-limited execution)
//! for running arbitrary work.
//!
//! ## Features
//!
//! - **Per-id configuration**: explicit registration, a replaceable default
//!   supplier, and write-once memoized resolution
//! - **Customizers**: one-shot post-construction engine configuration,
//!   applied exactly once per engine instance
//! - **Shared engines**: one live breaker engine per id, reused across all
//!   wrappers for that id
//! - **Timeout-bounded execution**: protected work runs on a managed worker
//!   pool with cooperative cancellation on timeout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ResilienceFactory                        │
//! │  (resolve config -> get-or-create engine -> customize once) │
//! └─────────────────────────────────────────────────────────────┘
//!                │                                   │
//!                ▼                                   ▼
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │       ConfigCache        │        │      EngineRegistry      │
//! │  (write-once per id via  │        │  (one BreakerEngine per  │
//! │   the default supplier)  │        │   id, process lifetime)  │
//! └──────────────────────────┘        └──────────────────────────┘
//!                                                    │
//!                                                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                ProtectedCall::run(operation)                 │
//! │  (permit -> dispatch on WorkerPool -> timeout -> outcome)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use fusegate::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let factory = ResilienceFactory::new();
//! factory.configure_default(|id| {
//!     ConfigBuilder::new(id)
//!         .breaker_policy(
//!             BreakerPolicy::default()
//!                 .with_sliding_window_size(10)
//!                 .with_wait_in_open(Duration::from_secs(5)),
//!         )
//!         .time_limit_policy(TimeLimitPolicy::default().with_time_limit(Duration::from_secs(2)))
//!         .build()
//!         .unwrap_or_else(|_| BreakerConfig::of_defaults(id))
//! });
//!
//! let call = factory.create("inventory").unwrap();
//! let stock = call
//!     .run_with_fallback(
//!         |_cancel| async { Ok::<_, std::io::Error>(12) },
//!         |_err| 0,
//!     )
//!     .await;
//! assert_eq!(stock, 12);
//! # }
//! ```

pub mod call;
pub mod config;
pub mod customize;
pub mod factory;
pub mod pool;

/// Prelude for common imports
pub mod prelude {
    pub use crate::call::{CallError, ProtectedCall};
    pub use crate::config::{BreakerConfig, ConfigBuilder, ConfigCache, ConfigError};
    pub use crate::customize::{Customizer, CustomizerRegistry};
    pub use crate::factory::ResilienceFactory;
    pub use crate::pool::{WorkerPool, WorkerPoolConfig};
    pub use fusegate_engine::{
        BreakerEngine, BreakerPolicy, CircuitState, EngineRegistry, TimeLimitPolicy,
    };
}

// Re-export key types at crate root
pub use call::{CallError, ProtectedCall};
pub use config::{BreakerConfig, ConfigBuilder, ConfigError};
pub use customize::{Customizer, CustomizerRegistry};
pub use factory::ResilienceFactory;
pub use pool::{WorkerPool, WorkerPoolConfig};

// Re-export the engine collaborator's surface
pub use fusegate_engine::{
    BreakerEngine, BreakerPolicy, CallPermit, CircuitState, EngineRegistry, PolicyError,
    RejectedError, TimeLimitPolicy, Transition,
};
