//! Dispatcher configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Configuration errors
///
/// Raised by [`DispatchConfig::validate`] before any item is admitted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Pool must have at least one slot
    #[error("pool_size must be at least 1 (got {0})")]
    InvalidPoolSize(usize),

    /// Delay bounds are inverted
    #[error("min_dispatch_delay ({min:?}) exceeds max_dispatch_delay ({max:?})")]
    InvalidDelayBounds { min: Duration, max: Duration },

    /// Backoff multiplier must grow the delay
    #[error("backoff_multiplier must be a finite value greater than 1.0 (got {0})")]
    InvalidBackoffMultiplier(f64),

    /// Recovery step must shrink the delay
    #[error("recovery_step must be greater than zero")]
    ZeroRecoveryStep,

    /// Capacity seed must be positive
    #[error("capacity_seed_delay must be greater than zero")]
    ZeroSeedDelay,

    /// A configured timeout is zero
    #[error("{0} must be greater than zero when set")]
    ZeroTimeout(&'static str),

    /// Retry policy is unusable
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

/// Dispatcher configuration
///
/// Field names serialize with an `_ms` suffix and millisecond values, so a
/// JSON document such as `{"pool_size": 4, "per_item_timeout_ms": 30000}`
/// deserializes directly. Missing fields fall back to defaults.
///
/// # Example
///
/// ```
/// use everruns_dispatch::DispatchConfig;
/// use std::time::Duration;
///
/// let config = DispatchConfig::default()
///     .with_pool_size(8)
///     .with_max_dispatch_delay(Duration::from_secs(10))
///     .with_per_item_timeout(Duration::from_secs(120));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of concurrent worker slots (1 = sequential mode)
    pub pool_size: usize,

    /// Lower bound of the adaptive dispatch delay
    #[serde(rename = "min_dispatch_delay_ms", with = "duration_millis")]
    pub min_dispatch_delay: Duration,

    /// Upper bound of the adaptive dispatch delay
    #[serde(rename = "max_dispatch_delay_ms", with = "duration_millis")]
    pub max_dispatch_delay: Duration,

    /// Factor applied to the delay on every capacity error
    pub backoff_multiplier: f64,

    /// Amount subtracted from the delay on every success
    #[serde(rename = "recovery_step_ms", with = "duration_millis")]
    pub recovery_step: Duration,

    /// Delay seeded before backoff when the current delay is zero
    #[serde(rename = "capacity_seed_delay_ms", with = "duration_millis")]
    pub capacity_seed_delay: Duration,

    /// Wall-clock budget for an item looping on capacity errors
    /// (None = retry capacity errors indefinitely)
    #[serde(rename = "per_item_timeout_ms", with = "option_duration_millis")]
    pub per_item_timeout: Option<Duration>,

    /// Upper bound on a single attempt (None = attempts run to completion)
    #[serde(rename = "attempt_timeout_ms", with = "option_duration_millis")]
    pub attempt_timeout: Option<Duration>,

    /// Bounded retry policy for normal errors
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            min_dispatch_delay: Duration::ZERO,
            max_dispatch_delay: Duration::from_millis(5000),
            backoff_multiplier: 2.0,
            recovery_step: Duration::from_millis(50),
            capacity_seed_delay: Duration::from_millis(100),
            per_item_timeout: None,
            attempt_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent worker slots
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the minimum dispatch delay
    pub fn with_min_dispatch_delay(mut self, delay: Duration) -> Self {
        self.min_dispatch_delay = delay;
        self
    }

    /// Set the maximum dispatch delay
    pub fn with_max_dispatch_delay(mut self, delay: Duration) -> Self {
        self.max_dispatch_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the recovery step
    pub fn with_recovery_step(mut self, step: Duration) -> Self {
        self.recovery_step = step;
        self
    }

    /// Set the delay seeded on the first capacity error
    pub fn with_capacity_seed_delay(mut self, delay: Duration) -> Self {
        self.capacity_seed_delay = delay;
        self
    }

    /// Bound how long an item may loop on capacity errors
    pub fn with_per_item_timeout(mut self, timeout: Duration) -> Self {
        self.per_item_timeout = Some(timeout);
        self
    }

    /// Bound each individual attempt
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Set the retry policy for normal errors
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size < 1 {
            return Err(ConfigError::InvalidPoolSize(self.pool_size));
        }
        if self.min_dispatch_delay > self.max_dispatch_delay {
            return Err(ConfigError::InvalidDelayBounds {
                min: self.min_dispatch_delay,
                max: self.max_dispatch_delay,
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier(
                self.backoff_multiplier,
            ));
        }
        if self.recovery_step.is_zero() {
            return Err(ConfigError::ZeroRecoveryStep);
        }
        if self.capacity_seed_delay.is_zero() {
            return Err(ConfigError::ZeroSeedDelay);
        }
        if self.per_item_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout("per_item_timeout"));
        }
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout("attempt_timeout"));
        }
        self.retry.validate()
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for `Option<Duration>` as milliseconds
pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.min_dispatch_delay, Duration::ZERO);
        assert_eq!(config.max_dispatch_delay, Duration::from_millis(5000));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.recovery_step, Duration::from_millis(50));
        assert!(config.per_item_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_pool() {
        let config = DispatchConfig::default().with_pool_size(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPoolSize(0)));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let config = DispatchConfig::default()
            .with_min_dispatch_delay(Duration::from_secs(10))
            .with_max_dispatch_delay(Duration::from_secs(1));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDelayBounds { .. })
        ));
    }

    #[test]
    fn test_rejects_non_growing_multiplier() {
        for multiplier in [1.0, 0.5, f64::NAN, f64::INFINITY] {
            let config = DispatchConfig::default().with_backoff_multiplier(multiplier);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidBackoffMultiplier(_))
            ));
        }
    }

    #[test]
    fn test_rejects_zero_step_and_timeouts() {
        let config = DispatchConfig::default().with_recovery_step(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroRecoveryStep));

        let config = DispatchConfig::default().with_per_item_timeout(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("per_item_timeout"))
        );
    }

    #[test]
    fn test_rejects_zero_attempt_policy() {
        let config =
            DispatchConfig::default().with_retry_policy(RetryPolicy::default().with_max_attempts(0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryPolicy(_))
        ));
    }

    #[test]
    fn test_rejects_deserialized_huge_jitter() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{ "retry": { "jitter": 1e308 } }"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryPolicy(_))
        ));
        assert!(crate::Dispatcher::new(config).is_err());
    }

    #[test]
    fn test_deserialize_millisecond_fields() {
        let config: DispatchConfig = serde_json::from_str(
            r#"{
                "pool_size": 4,
                "max_dispatch_delay_ms": 2000,
                "recovery_step_ms": 25,
                "per_item_timeout_ms": 500
            }"#,
        )
        .unwrap();

        assert_eq!(config.pool_size, 4);
        assert_eq!(config.max_dispatch_delay, Duration::from_millis(2000));
        assert_eq!(config.recovery_step, Duration::from_millis(25));
        assert_eq!(config.per_item_timeout, Some(Duration::from_millis(500)));
        // Unspecified fields keep their defaults
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.attempt_timeout.is_none());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = DispatchConfig::default()
            .with_pool_size(3)
            .with_attempt_timeout(Duration::from_secs(30));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["attempt_timeout_ms"], 30_000);
        assert!(json["per_item_timeout_ms"].is_null());

        let parsed: DispatchConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}
