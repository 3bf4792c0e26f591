//! Attempt classification and retry decisions

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AttemptDisposition;
use crate::call::{CallError, CallResult};
use crate::outcome::Outcome;

use super::RetryPolicy;

/// Detects transient-overload signals from the external service
///
/// What counts as "out of capacity" is service-specific, so the dispatcher
/// takes this predicate from the caller. Any `Fn(&CallError) -> bool` works.
pub trait CapacityClassifier: Send + Sync {
    /// Whether the error is a capacity (transient overload) error
    fn is_capacity_error(&self, error: &CallError) -> bool;
}

impl<F> CapacityClassifier for F
where
    F: Fn(&CallError) -> bool + Send + Sync,
{
    fn is_capacity_error(&self, error: &CallError) -> bool {
        self(error)
    }
}

/// Capacity classifier matching a set of error codes
///
/// # Example
///
/// ```
/// use everruns_dispatch::{CallError, CapacityClassifier, CapacitySignals};
///
/// let signals = CapacitySignals::default().with_code("HTTP_429");
///
/// assert!(signals.is_capacity_error(&CallError::capacity("busy")));
/// assert!(signals.is_capacity_error(&CallError::retryable("x").with_code("HTTP_429")));
/// assert!(!signals.is_capacity_error(&CallError::retryable("bad request")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacitySignals {
    codes: HashSet<String>,
}

impl Default for CapacitySignals {
    fn default() -> Self {
        Self::new([CallError::CAPACITY_EXCEEDED, "RATE_LIMITED", "SERVICE_OVERLOADED"])
    }
}

impl CapacitySignals {
    /// Match exactly the given codes
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a code to the set
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.codes.insert(code.into());
        self
    }
}

impl CapacityClassifier for CapacitySignals {
    fn is_capacity_error(&self, error: &CallError) -> bool {
        error
            .code()
            .is_some_and(|code| self.codes.contains(code))
    }
}

/// What happens to an item after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Terminal success
    Complete,
    /// Re-admit without consuming an attempt
    RetryCapacity,
    /// Re-admit after the policy backoff
    RetryNormal { backoff: Duration },
    /// Terminal failure
    Fail,
    /// Per-item deadline cannot be met; resolve as a fatal timeout once
    /// `wait` (the remaining budget) has elapsed
    TimeOut { wait: Duration },
}

impl Decision {
    /// Whether the item leaves the retry loop
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RetryCapacity | Self::RetryNormal { .. })
    }

    /// Disposition reported in the audit record
    pub fn disposition(&self) -> AttemptDisposition {
        match self {
            Self::Complete => AttemptDisposition::Completed,
            Self::RetryCapacity => AttemptDisposition::CapacityRetry,
            Self::RetryNormal { .. } => AttemptDisposition::NormalRetry,
            Self::Fail => AttemptDisposition::Failed,
            Self::TimeOut { .. } => AttemptDisposition::FatalTimeout,
        }
    }
}

/// Classifies attempt results and decides retries
///
/// Combines the caller's capacity predicate with the bounded [`RetryPolicy`].
/// Both steps are pure so the retry state machine can be tested without a
/// runtime.
#[derive(Clone)]
pub struct RetryClassifier {
    capacity: Arc<dyn CapacityClassifier>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryClassifier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryClassifier {
    /// Create a classifier
    pub fn new(capacity: Arc<dyn CapacityClassifier>, policy: RetryPolicy) -> Self {
        Self { capacity, policy }
    }

    /// The bounded retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Classify a raw attempt result
    ///
    /// Produces `Success`, `CapacityError` or `NormalError`.
    pub fn classify<R>(&self, result: CallResult<R>) -> Outcome<R> {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) if self.capacity.is_capacity_error(&error) => {
                Outcome::CapacityError(error)
            }
            Err(error) => Outcome::NormalError(error),
        }
    }

    /// Decide what happens after an attempt
    ///
    /// - `attempt_count`: bounded attempts spent, including this one when it
    ///   counted
    /// - `remaining`: time left before the per-item deadline, if one is set
    /// - `next_delay`: throttle delay the next admission would wait
    pub fn decide<R>(
        &self,
        outcome: &Outcome<R>,
        attempt_count: u32,
        remaining: Option<Duration>,
        next_delay: Duration,
    ) -> Decision {
        match outcome {
            Outcome::Success(_) => Decision::Complete,
            Outcome::CapacityError(_) => match remaining {
                Some(left) if left.is_zero() || next_delay >= left => {
                    Decision::TimeOut { wait: left }
                }
                _ => Decision::RetryCapacity,
            },
            Outcome::NormalError(error) => {
                if self.policy.is_retryable(error)
                    && self.policy.has_attempts_remaining(attempt_count)
                {
                    Decision::RetryNormal {
                        backoff: self.policy.delay_for_attempt(attempt_count + 1),
                    }
                } else {
                    Decision::Fail
                }
            }
            Outcome::FatalTimeout(_) => Decision::TimeOut {
                wait: Duration::ZERO,
            },
            Outcome::Aborted(_) => Decision::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(max_attempts: u32) -> RetryClassifier {
        RetryClassifier::new(
            Arc::new(CapacitySignals::default()),
            RetryPolicy::fixed(Duration::from_millis(125), max_attempts),
        )
    }

    #[test]
    fn test_classify() {
        let classifier = classifier(3);

        assert!(classifier.classify(Ok::<_, CallError>(1)).is_success());
        assert!(matches!(
            classifier.classify::<()>(Err(CallError::capacity("busy"))),
            Outcome::CapacityError(_)
        ));
        assert!(matches!(
            classifier.classify::<()>(Err(CallError::retryable("bad gateway"))),
            Outcome::NormalError(_)
        ));
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = RetryClassifier::new(
            Arc::new(|e: &CallError| e.message.contains("overloaded")),
            RetryPolicy::no_retry(),
        );

        assert!(matches!(
            classifier.classify::<()>(Err(CallError::retryable("model overloaded"))),
            Outcome::CapacityError(_)
        ));
    }

    #[test]
    fn test_success_completes() {
        let decision = classifier(3).decide(&Outcome::Success(()), 1, None, Duration::ZERO);
        assert_eq!(decision, Decision::Complete);
        assert!(decision.is_terminal());
    }

    #[test]
    fn test_normal_error_bounded() {
        let classifier = classifier(3);
        let outcome: Outcome<()> = Outcome::NormalError(CallError::retryable("500"));

        assert_eq!(
            classifier.decide(&outcome, 1, None, Duration::ZERO),
            Decision::RetryNormal {
                backoff: Duration::from_millis(125)
            }
        );
        assert_eq!(
            classifier.decide(&outcome, 2, None, Duration::ZERO),
            Decision::RetryNormal {
                backoff: Duration::from_millis(125)
            }
        );
        assert_eq!(
            classifier.decide(&outcome, 3, None, Duration::ZERO),
            Decision::Fail
        );
    }

    #[test]
    fn test_non_retryable_fails_immediately() {
        let outcome: Outcome<()> = Outcome::NormalError(CallError::non_retryable("auth"));
        assert_eq!(
            classifier(5).decide(&outcome, 1, None, Duration::ZERO),
            Decision::Fail
        );
    }

    #[test]
    fn test_capacity_retries_without_deadline() {
        let outcome: Outcome<()> = Outcome::CapacityError(CallError::capacity("busy"));
        // Attempt count is irrelevant for capacity errors
        assert_eq!(
            classifier(1).decide(&outcome, 50, None, Duration::from_secs(5)),
            Decision::RetryCapacity
        );
    }

    #[test]
    fn test_capacity_deadline() {
        let classifier = classifier(3);
        let outcome: Outcome<()> = Outcome::CapacityError(CallError::capacity("busy"));

        // Enough budget for the next admission
        assert_eq!(
            classifier.decide(
                &outcome,
                0,
                Some(Duration::from_millis(500)),
                Duration::from_millis(200)
            ),
            Decision::RetryCapacity
        );

        // Next admission would land on or past the deadline
        assert_eq!(
            classifier.decide(
                &outcome,
                0,
                Some(Duration::from_millis(300)),
                Duration::from_millis(400)
            ),
            Decision::TimeOut {
                wait: Duration::from_millis(300)
            }
        );

        // Deadline already passed
        assert_eq!(
            classifier.decide(&outcome, 0, Some(Duration::ZERO), Duration::ZERO),
            Decision::TimeOut {
                wait: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(
            Decision::RetryCapacity.disposition(),
            AttemptDisposition::CapacityRetry
        );
        assert_eq!(
            Decision::TimeOut {
                wait: Duration::ZERO
            }
            .disposition(),
            AttemptDisposition::FatalTimeout
        );
        assert!(!Decision::RetryNormal {
            backoff: Duration::ZERO
        }
        .is_terminal());
    }
}
