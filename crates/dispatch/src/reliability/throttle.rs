//! Adaptive dispatch throttle
//!
//! One delay value shared by every admission of a dispatcher. Capacity errors
//! multiply it (fast ramp-down of the dispatch rate), successes subtract a fixed
//! step (slow ramp-up), and every mutation is clamped to `[min_delay, max_delay]`.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::{duration_millis, ConfigError, DispatchConfig};

/// Point-in-time view of the throttle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleState {
    /// Delay applied before the next admission
    #[serde(rename = "current_delay_ms", with = "duration_millis")]
    pub current_delay: Duration,

    /// Lower clamp
    #[serde(rename = "min_delay_ms", with = "duration_millis")]
    pub min_delay: Duration,

    /// Upper clamp
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,

    /// Factor applied on capacity errors
    pub backoff_multiplier: f64,

    /// Amount subtracted on success
    #[serde(rename = "recovery_step_ms", with = "duration_millis")]
    pub recovery_step: Duration,
}

impl ThrottleState {
    /// Whether the current delay lies within the configured bounds
    pub fn in_bounds(&self) -> bool {
        self.min_delay <= self.current_delay && self.current_delay <= self.max_delay
    }
}

/// Shared adaptive delay controller
///
/// The delay can only move through [`on_capacity_error`](Self::on_capacity_error)
/// and [`on_success`](Self::on_success); there is no setter. Mutations are
/// serialized by a mutex so concurrent workers never observe or leave an
/// out-of-bounds value.
///
/// # Example
///
/// ```
/// use everruns_dispatch::ThrottleController;
/// use std::time::Duration;
///
/// let throttle = ThrottleController::new(
///     Duration::ZERO,
///     Duration::from_secs(5),
///     2.0,
///     Duration::from_millis(50),
/// )
/// .unwrap();
///
/// // Zero delay is seeded to 100ms, then doubled
/// assert_eq!(throttle.on_capacity_error(), Duration::from_millis(200));
/// assert_eq!(throttle.on_success(), Duration::from_millis(150));
/// ```
#[derive(Debug)]
pub struct ThrottleController {
    min_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    recovery_step: Duration,
    seed_delay: Duration,
    current: Mutex<Duration>,
}

impl ThrottleController {
    /// Default delay seeded before backoff when the delay is zero
    pub const DEFAULT_SEED_DELAY: Duration = Duration::from_millis(100);

    /// Create a controller starting at `min_delay`
    pub fn new(
        min_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        recovery_step: Duration,
    ) -> Result<Self, ConfigError> {
        Self::with_seed(
            min_delay,
            max_delay,
            backoff_multiplier,
            recovery_step,
            Self::DEFAULT_SEED_DELAY,
        )
    }

    /// Create a controller from a dispatcher configuration
    pub fn from_config(config: &DispatchConfig) -> Result<Self, ConfigError> {
        Self::with_seed(
            config.min_dispatch_delay,
            config.max_dispatch_delay,
            config.backoff_multiplier,
            config.recovery_step,
            config.capacity_seed_delay,
        )
    }

    fn with_seed(
        min_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        recovery_step: Duration,
        seed_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if min_delay > max_delay {
            return Err(ConfigError::InvalidDelayBounds {
                min: min_delay,
                max: max_delay,
            });
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier <= 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier(backoff_multiplier));
        }
        if recovery_step.is_zero() {
            return Err(ConfigError::ZeroRecoveryStep);
        }
        if seed_delay.is_zero() {
            return Err(ConfigError::ZeroSeedDelay);
        }

        Ok(Self {
            min_delay,
            max_delay,
            backoff_multiplier,
            recovery_step,
            seed_delay,
            current: Mutex::new(min_delay),
        })
    }

    /// Delay to wait before the next admission
    pub fn current_delay(&self) -> Duration {
        *self.current.lock()
    }

    /// Snapshot of the full throttle state
    pub fn state(&self) -> ThrottleState {
        ThrottleState {
            current_delay: self.current_delay(),
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            recovery_step: self.recovery_step,
        }
    }

    /// Record a capacity error: multiplicative backoff
    ///
    /// A zero delay is first seeded to the seed floor so that backoff has
    /// something to multiply. Returns the new delay.
    pub fn on_capacity_error(&self) -> Duration {
        let mut current = self.current.lock();
        let previous = *current;
        let base = if previous.is_zero() {
            self.seed_delay
        } else {
            previous
        };
        let grown_nanos = base.as_nanos() as f64 * self.backoff_multiplier;
        let grown = if grown_nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(grown_nanos.round() as u64)
        };
        *current = self.clamp(grown);
        debug_assert!(self.bounds_hold(*current));

        debug!(
            previous_ms = previous.as_millis() as u64,
            delay_ms = current.as_millis() as u64,
            "Capacity error, throttle backing off"
        );
        *current
    }

    /// Record a success: additive recovery
    ///
    /// Returns the new delay.
    pub fn on_success(&self) -> Duration {
        let mut current = self.current.lock();
        let previous = *current;
        *current = self.clamp(previous.saturating_sub(self.recovery_step));
        debug_assert!(self.bounds_hold(*current));

        if previous != *current {
            trace!(
                previous_ms = previous.as_millis() as u64,
                delay_ms = current.as_millis() as u64,
                "Success, throttle recovering"
            );
        }
        *current
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.clamp(self.min_delay, self.max_delay)
    }

    fn bounds_hold(&self, delay: Duration) -> bool {
        self.min_delay <= delay && delay <= self.max_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn controller(min_ms: u64, max_ms: u64) -> ThrottleController {
        ThrottleController::new(
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
            2.0,
            Duration::from_millis(50),
        )
        .unwrap()
    }

    #[test]
    fn test_starts_at_min_delay() {
        assert_eq!(controller(0, 5000).current_delay(), Duration::ZERO);
        assert_eq!(controller(30, 5000).current_delay(), Duration::from_millis(30));
    }

    #[test]
    fn test_capacity_error_seeds_zero_delay() {
        let throttle = controller(0, 5000);
        assert_eq!(throttle.on_capacity_error(), Duration::from_millis(200));
        assert_eq!(throttle.on_capacity_error(), Duration::from_millis(400));
        assert_eq!(throttle.on_capacity_error(), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_then_recovery() {
        let min = Duration::ZERO;
        let max = Duration::from_millis(5000);

        for k in 0..8u32 {
            let throttle = controller(0, 5000);
            throttle.on_capacity_error();
            for _ in 0..k {
                throttle.on_success();
            }

            let expected = Duration::from_millis(200)
                .saturating_sub(Duration::from_millis(50) * k)
                .clamp(min, max);
            assert_eq!(throttle.current_delay(), expected, "after {k} successes");
        }
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let throttle = controller(0, 1000);
        for _ in 0..20 {
            throttle.on_capacity_error();
        }
        assert_eq!(throttle.current_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_recovery_floors_at_min() {
        let throttle = controller(75, 1000);
        throttle.on_capacity_error();
        for _ in 0..10 {
            throttle.on_success();
        }
        assert_eq!(throttle.current_delay(), Duration::from_millis(75));
    }

    #[test]
    fn test_random_sequences_stay_in_bounds() {
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let min = rng.gen_range(0..200u64);
            let max = min + rng.gen_range(0..3000u64);
            let throttle = controller(min, max);

            for _ in 0..200 {
                if rng.gen_bool(0.4) {
                    throttle.on_capacity_error();
                } else {
                    throttle.on_success();
                }
                assert!(throttle.state().in_bounds(), "{:?}", throttle.state());
            }
        }
    }

    #[test]
    fn test_concurrent_mutations_stay_in_bounds() {
        let throttle = controller(10, 2000);

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let throttle = &throttle;
                scope.spawn(move || {
                    for i in 0..500 {
                        if (i + worker) % 3 == 0 {
                            throttle.on_capacity_error();
                        } else {
                            throttle.on_success();
                        }
                        assert!(throttle.state().in_bounds());
                    }
                });
            }
        });

        assert!(throttle.state().in_bounds());
    }

    #[test]
    fn test_rejects_invalid_bounds() {
        let err = ThrottleController::new(
            Duration::from_secs(2),
            Duration::from_secs(1),
            2.0,
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDelayBounds { .. }));

        assert!(ThrottleController::new(
            Duration::ZERO,
            Duration::from_secs(1),
            1.0,
            Duration::from_millis(50)
        )
        .is_err());
    }

    #[test]
    fn test_state_serialization() {
        let throttle = controller(0, 5000);
        throttle.on_capacity_error();

        let json = serde_json::to_value(throttle.state()).unwrap();
        assert_eq!(json["current_delay_ms"], 200);
        assert_eq!(json["max_delay_ms"], 5000);
    }
}
