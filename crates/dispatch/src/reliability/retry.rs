//! Retry policy for normal errors

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::call::CallError;
use crate::config::{duration_millis, ConfigError};

/// Bounded retry policy for normal (non-capacity) errors
///
/// Capacity errors never consume attempts; only successful and normally
/// failing attempts count towards `max_attempts`. The backoff computed here is
/// applied on top of the shared throttle delay.
///
/// # Example
///
/// ```
/// use everruns_dispatch::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_millis(200))
///     .with_max_interval(Duration::from_secs(10));
///
/// // First retry after ~200ms
/// // Second retry after ~400ms
/// // Third retry after ~800ms
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of counted attempts (including the initial one)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(rename = "initial_interval_ms", with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(rename = "max_interval_ms", with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means ±10% randomness.
    pub jitter: f64,

    /// Error codes that should NOT be retried
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy
    ///
    /// - 3 max attempts
    /// - 500ms initial interval
    /// - 30 second max interval
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy that never retries normal errors
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Add a non-retryable error code
    pub fn with_non_retryable_error(mut self, code: impl Into<String>) -> Self {
        self.non_retryable_errors.push(code.into());
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "backoff_coefficient must be >= 1.0 (got {})",
                self.backoff_coefficient
            )));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "jitter must be within 0.0..=1.0 (got {})",
                self.jitter
            )));
        }
        if self.initial_interval > self.max_interval {
            return Err(ConfigError::InvalidRetryPolicy(
                "initial_interval exceeds max_interval".into(),
            ));
        }
        Ok(())
    }

    /// Calculate the backoff before a given attempt number (1-based)
    ///
    /// The first attempt has no backoff; attempt 2 waits `initial_interval`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let exponent = i32::try_from(retry_num - 1).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Check if an error may be retried under this policy
    pub fn is_retryable(&self, error: &CallError) -> bool {
        if !error.retryable {
            return false;
        }
        match error.code() {
            Some(code) => !self.non_retryable_errors.iter().any(|c| c == code),
            None => true,
        }
    }

    /// Check if there are remaining attempts after `attempt_count` were spent
    pub fn has_attempts_remaining(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_millis(500));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);

        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::exponential()
            .with_initial_interval(Duration::from_secs(1))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::exponential()
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::exponential()
            .with_initial_interval(Duration::from_secs(1))
            .with_jitter(0.2);

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_retryability() {
        let policy = RetryPolicy::exponential()
            .with_non_retryable_error("INVALID_INPUT")
            .with_non_retryable_error("UNAUTHORIZED");

        assert!(!policy.is_retryable(&CallError::retryable("x").with_code("INVALID_INPUT")));
        assert!(!policy.is_retryable(&CallError::non_retryable("x")));
        assert!(policy.is_retryable(&CallError::retryable("x").with_code("TIMEOUT")));
        assert!(policy.is_retryable(&CallError::retryable("x")));
    }

    #[test]
    fn test_has_attempts_remaining() {
        let policy = RetryPolicy::exponential().with_max_attempts(3);

        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(2));
        assert!(!policy.has_attempts_remaining(3));
    }

    #[test]
    fn test_validation() {
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::default()
            .with_backoff_coefficient(0.5)
            .validate()
            .is_err());
        assert!(RetryPolicy::default()
            .with_initial_interval(Duration::from_secs(60))
            .validate()
            .is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_jitter() {
        // Deserialized policies skip the clamping builder
        for jitter in [1.5, -0.1, f64::NAN, f64::INFINITY, 1e308] {
            let policy = RetryPolicy {
                jitter,
                ..RetryPolicy::default()
            };
            assert!(
                matches!(policy.validate(), Err(ConfigError::InvalidRetryPolicy(_))),
                "jitter {jitter} accepted"
            );
        }
        assert!(RetryPolicy::default().with_jitter(1.0).validate().is_ok());
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(10)
            .with_non_retryable_error("TEST");

        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"initial_interval_ms\":500"));
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
