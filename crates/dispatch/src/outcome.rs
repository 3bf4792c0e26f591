//! Attempt and item outcomes

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::call::{CallError, CallResult};
use crate::worker::ItemState;

/// Outcome of an attempt, and the terminal outcome of an item
///
/// Exactly one variant applies per attempt. `CapacityError` is never
/// emitted to the caller: items either retry past it or convert it into
/// `FatalTimeout`. `Aborted` only appears as a terminal outcome when a run
/// is cancelled before the item resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    /// The call succeeded
    Success(R),
    /// The external service signalled transient overload
    CapacityError(CallError),
    /// The call failed for a real reason
    NormalError(CallError),
    /// The per-item deadline expired while retrying capacity errors
    FatalTimeout(CallError),
    /// The run was cancelled before the item resolved
    Aborted(Option<CallError>),
}

impl<R> Outcome<R> {
    /// Payload-free classification of this outcome
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::CapacityError(_) => OutcomeKind::CapacityError,
            Self::NormalError(_) => OutcomeKind::NormalError,
            Self::FatalTimeout(_) => OutcomeKind::FatalTimeout,
            Self::Aborted(_) => OutcomeKind::Aborted,
        }
    }

    /// Whether the call succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The error carried by this outcome, if any
    pub fn error(&self) -> Option<&CallError> {
        match self {
            Self::Success(_) => None,
            Self::CapacityError(e) | Self::NormalError(e) | Self::FatalTimeout(e) => Some(e),
            Self::Aborted(e) => e.as_ref(),
        }
    }

    /// Successful value, if any
    pub fn value(&self) -> Option<&R> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Convert into a plain result
    ///
    /// Aborted items without a recorded error become a non-retryable
    /// `CallError` describing the abort.
    pub fn into_result(self) -> CallResult<R> {
        match self {
            Self::Success(value) => Ok(value),
            Self::CapacityError(e) | Self::NormalError(e) | Self::FatalTimeout(e) => Err(e),
            Self::Aborted(Some(e)) => Err(e),
            Self::Aborted(None) => Err(CallError::non_retryable("item aborted before dispatch")),
        }
    }

    /// Turn a capacity error into a fatal timeout, keeping the error detail
    pub(crate) fn into_timeout(self) -> Self {
        match self {
            Self::CapacityError(e) => Self::FatalTimeout(e),
            other => other,
        }
    }

    /// Drop the success payload, keeping the last error for retries
    pub(crate) fn into_error(self) -> Option<CallError> {
        match self {
            Self::Success(_) => None,
            Self::CapacityError(e) | Self::NormalError(e) | Self::FatalTimeout(e) => Some(e),
            Self::Aborted(e) => e,
        }
    }
}

/// Terminal outcome of one submitted item, as yielded to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<R> {
    /// Position of the item in the submitted sequence
    pub submission_index: u64,

    /// Attempts made, capacity errors included
    pub attempts: u32,

    /// Bounded attempts spent (successes and normal errors)
    pub attempt_count: u32,

    /// Capacity errors absorbed along the way
    pub capacity_errors: u32,

    /// Time from submission to resolution
    pub elapsed: Duration,

    /// Terminal outcome
    pub outcome: Outcome<R>,
}

impl<R> Completion<R> {
    /// Completion for an item that never reached a terminal state
    pub(crate) fn aborted(submission_index: u64) -> Self {
        Self {
            submission_index,
            attempts: 0,
            attempt_count: 0,
            capacity_errors: 0,
            elapsed: Duration::ZERO,
            outcome: Outcome::Aborted(None),
        }
    }

    /// Terminal state of the item
    pub fn state(&self) -> ItemState {
        ItemState::from_terminal(self.outcome.kind())
    }

    /// Whether the item completed successfully
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Convert into a plain result
    pub fn into_result(self) -> CallResult<R> {
        self.outcome.into_result()
    }
}

/// Payload-free outcome classification (used in audit records and stats)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    CapacityError,
    NormalError,
    FatalTimeout,
    Aborted,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::CapacityError => write!(f, "capacity_error"),
            Self::NormalError => write!(f, "normal_error"),
            Self::FatalTimeout => write!(f, "fatal_timeout"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_error() {
        let ok: Outcome<u32> = Outcome::Success(3);
        assert_eq!(ok.kind(), OutcomeKind::Success);
        assert!(ok.error().is_none());
        assert_eq!(ok.value(), Some(&3));

        let err: Outcome<u32> = Outcome::NormalError(CallError::retryable("boom"));
        assert_eq!(err.kind(), OutcomeKind::NormalError);
        assert_eq!(err.error().map(|e| e.message.as_str()), Some("boom"));
    }

    #[test]
    fn test_into_timeout_only_converts_capacity() {
        let cap: Outcome<()> = Outcome::CapacityError(CallError::capacity("busy"));
        let converted = cap.into_timeout();
        assert_eq!(converted.kind(), OutcomeKind::FatalTimeout);
        assert_eq!(converted.error().map(|e| e.message.as_str()), Some("busy"));

        let normal: Outcome<()> = Outcome::NormalError(CallError::retryable("x"));
        assert_eq!(normal.into_timeout().kind(), OutcomeKind::NormalError);
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Outcome::Success(1).into_result(), Ok(1));

        let aborted: Outcome<u8> = Outcome::Aborted(None);
        let err = aborted.into_result().unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn test_completion_state() {
        let aborted: Completion<()> = Completion::aborted(9);
        assert_eq!(aborted.submission_index, 9);
        assert_eq!(aborted.state(), ItemState::Aborted);
        assert!(!aborted.is_success());

        let failed = Completion::<()> {
            outcome: Outcome::NormalError(CallError::retryable("x")),
            ..Completion::aborted(1)
        };
        assert_eq!(failed.state(), ItemState::Failed);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&OutcomeKind::FatalTimeout).unwrap();
        assert_eq!(json, "\"fatal_timeout\"");
        assert_eq!(OutcomeKind::CapacityError.to_string(), "capacity_error");
    }
}
