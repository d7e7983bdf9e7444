//! Breaker and time-limit policies
//!
//! Policies are immutable value types. The factory resolves one pair of
//! (breaker policy, time-limit policy) per protected-operation id and never
//! mutates it afterward.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Policy validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Failure rate threshold outside the accepted range
    #[error("failure rate threshold must be in (0, 100], got {0}")]
    FailureRateThreshold(f64),

    /// Sliding window cannot be empty
    #[error("sliding window size must be at least 1")]
    EmptyWindow,

    /// Minimum call count outside the accepted range
    #[error("minimum calls must be at least 1 and no larger than the window size ({window})")]
    MinimumCalls { window: u32 },

    /// Half-open state needs at least one probe permit
    #[error("half-open probe count must be at least 1")]
    NoProbes,

    /// A zero time limit would reject every call
    #[error("time limit must be greater than zero")]
    ZeroTimeLimit,
}

/// Circuit breaker policy
///
/// Controls when the breaker opens and how it recovers.
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure rate ≥ threshold  ┌─────────┐  wait_in_open elapsed  ┌──────────┐
/// │ Closed  │ ─────────────────────────► │  Open   │ ─────────────────────► │ HalfOpen │
/// └─────────┘                            └─────────┘                        └──────────┘
///      ▲                                      ▲                                   │
///      │            all probes pass           │        probe round fails          │
///      └──────────────────────────────────────┼───────────────────────────────────┤
///                                             └───────────────────────────────────┘
/// ```
///
/// The failure rate is evaluated over a count-based sliding window of the
/// most recent call outcomes, once at least `minimum_calls` outcomes have
/// been observed.
///
/// # Example
///
/// ```
/// use fusegate_engine::BreakerPolicy;
/// use std::time::Duration;
///
/// let policy = BreakerPolicy::default()
///     .with_failure_rate_threshold(50.0)
///     .with_sliding_window_size(10)
///     .with_wait_in_open(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerPolicy {
    /// Failure rate (percent of calls in the window) at which the circuit opens
    pub failure_rate_threshold: f64,

    /// Number of most recent call outcomes considered
    pub sliding_window_size: u32,

    /// Outcomes required before the failure rate is evaluated at all
    pub minimum_calls: u32,

    /// Time to wait in the open state before probing recovery
    #[serde(with = "duration_millis")]
    pub wait_in_open: Duration,

    /// Calls admitted in the half-open state to test recovery
    pub half_open_probes: u32,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 100,
            minimum_calls: 100,
            wait_in_open: Duration::from_secs(60),
            half_open_probes: 10,
        }
    }
}

impl BreakerPolicy {
    /// Create a policy with library defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure rate threshold (percent) that opens the circuit
    pub fn with_failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    /// Set the sliding window size (number of calls)
    ///
    /// Also clamps `minimum_calls` down to the new window size so that a
    /// smaller window does not silently disable rate evaluation.
    pub fn with_sliding_window_size(mut self, size: u32) -> Self {
        self.sliding_window_size = size;
        self.minimum_calls = self.minimum_calls.min(size);
        self
    }

    /// Set the minimum number of recorded calls before the rate is evaluated
    pub fn with_minimum_calls(mut self, calls: u32) -> Self {
        self.minimum_calls = calls;
        self
    }

    /// Set the wait duration in the open state
    pub fn with_wait_in_open(mut self, wait: Duration) -> Self {
        self.wait_in_open = wait;
        self
    }

    /// Set the number of probe calls admitted in the half-open state
    pub fn with_half_open_probes(mut self, probes: u32) -> Self {
        self.half_open_probes = probes;
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(PolicyError::FailureRateThreshold(
                self.failure_rate_threshold,
            ));
        }
        if self.sliding_window_size == 0 {
            return Err(PolicyError::EmptyWindow);
        }
        if self.minimum_calls == 0 || self.minimum_calls > self.sliding_window_size {
            return Err(PolicyError::MinimumCalls {
                window: self.sliding_window_size,
            });
        }
        if self.half_open_probes == 0 {
            return Err(PolicyError::NoProbes);
        }
        Ok(())
    }
}

/// Time-limit policy for a guarded call
///
/// Bounds how long a dispatched operation may run. On expiry the operation
/// is signalled for cancellation (cooperative) and, when `cancel_on_timeout`
/// is set, the executing task is also aborted.
///
/// # Example
///
/// ```
/// use fusegate_engine::TimeLimitPolicy;
/// use std::time::Duration;
///
/// let policy = TimeLimitPolicy::default()
///     .with_time_limit(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeLimitPolicy {
    /// Maximum duration for a guarded call
    #[serde(with = "duration_millis")]
    pub time_limit: Duration,

    /// Whether to abort the executing task when the limit is exceeded
    pub cancel_on_timeout: bool,
}

impl Default for TimeLimitPolicy {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
            cancel_on_timeout: true,
        }
    }
}

impl TimeLimitPolicy {
    /// Create a policy with library defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum call duration
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Set whether the executing task is aborted on timeout
    pub fn with_cancel_on_timeout(mut self, cancel: bool) -> Self {
        self.cancel_on_timeout = cancel;
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.time_limit.is_zero() {
            return Err(PolicyError::ZeroTimeLimit);
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_policy_defaults() {
        let policy = BreakerPolicy::default();
        assert_eq!(policy.failure_rate_threshold, 50.0);
        assert_eq!(policy.sliding_window_size, 100);
        assert_eq!(policy.minimum_calls, 100);
        assert_eq!(policy.wait_in_open, Duration::from_secs(60));
        assert_eq!(policy.half_open_probes, 10);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_breaker_policy_builder() {
        let policy = BreakerPolicy::new()
            .with_failure_rate_threshold(25.0)
            .with_sliding_window_size(10)
            .with_minimum_calls(5)
            .with_wait_in_open(Duration::from_secs(5))
            .with_half_open_probes(3);

        assert_eq!(policy.failure_rate_threshold, 25.0);
        assert_eq!(policy.sliding_window_size, 10);
        assert_eq!(policy.minimum_calls, 5);
        assert_eq!(policy.wait_in_open, Duration::from_secs(5));
        assert_eq!(policy.half_open_probes, 3);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_shrinking_window_clamps_minimum_calls() {
        let policy = BreakerPolicy::default().with_sliding_window_size(10);
        assert_eq!(policy.minimum_calls, 10);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_breaker_policy_validation() {
        let bad_rate = BreakerPolicy::default().with_failure_rate_threshold(0.0);
        assert!(matches!(
            bad_rate.validate(),
            Err(PolicyError::FailureRateThreshold(_))
        ));

        let bad_rate = BreakerPolicy::default().with_failure_rate_threshold(101.0);
        assert!(matches!(
            bad_rate.validate(),
            Err(PolicyError::FailureRateThreshold(_))
        ));

        let mut no_window = BreakerPolicy::default();
        no_window.sliding_window_size = 0;
        assert_eq!(no_window.validate(), Err(PolicyError::EmptyWindow));

        let bad_minimum = BreakerPolicy::default()
            .with_sliding_window_size(10)
            .with_minimum_calls(20);
        assert_eq!(
            bad_minimum.validate(),
            Err(PolicyError::MinimumCalls { window: 10 })
        );

        let no_probes = BreakerPolicy::default().with_half_open_probes(0);
        assert_eq!(no_probes.validate(), Err(PolicyError::NoProbes));
    }

    #[test]
    fn test_time_limit_defaults() {
        let policy = TimeLimitPolicy::default();
        assert_eq!(policy.time_limit, Duration::from_secs(30));
        assert!(policy.cancel_on_timeout);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_time_limit_validation() {
        let policy = TimeLimitPolicy::new().with_time_limit(Duration::ZERO);
        assert_eq!(policy.validate(), Err(PolicyError::ZeroTimeLimit));
    }

    #[test]
    fn test_serialization_round_trip() {
        let policy = BreakerPolicy::default()
            .with_sliding_window_size(10)
            .with_wait_in_open(Duration::from_millis(2500));
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: BreakerPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);

        let limit = TimeLimitPolicy::new()
            .with_time_limit(Duration::from_millis(1500))
            .with_cancel_on_timeout(false);
        let json = serde_json::to_string(&limit).unwrap();
        let parsed: TimeLimitPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(limit, parsed);
    }
}
