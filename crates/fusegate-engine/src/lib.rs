//! # Fusegate Breaker Engine
//!
//! The circuit-breaker collaborator behind the `fusegate` resilience
//! factory. The factory configures and instantiates engines through this
//! crate's narrow surface and treats them as opaque handles afterward.
//!
//! ## Components
//!
//! - [`BreakerPolicy`] / [`TimeLimitPolicy`] - immutable, validated policy
//!   values
//! - [`BreakerEngine`] - per-id closed/open/half-open state machine with a
//!   count-based sliding window and transition-notification hooks
//! - [`CallPermit`] - outcome reporting for an admitted call
//! - [`EngineRegistry`] - process-wide get-or-create collection of live
//!   engines, shared and reused across calls
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use fusegate_engine::{BreakerEngine, BreakerPolicy, CircuitState};
//!
//! let engine = Arc::new(BreakerEngine::new("search", BreakerPolicy::default()));
//! assert_eq!(engine.state(), CircuitState::Closed);
//!
//! let permit = engine.acquire().expect("closed circuit admits calls");
//! permit.success();
//! ```

pub mod engine;
pub mod policy;
pub mod registry;
pub mod state;

pub use engine::{BreakerEngine, CallPermit, RejectedError, TransitionListener};
pub use policy::{BreakerPolicy, PolicyError, TimeLimitPolicy};
pub use registry::EngineRegistry;
pub use state::{CircuitState, Transition};
