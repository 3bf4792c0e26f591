//! Work item and its retry state machine

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::call::{AttemptContext, CallError};
use crate::outcome::{Completion, Outcome, OutcomeKind};
use crate::reliability::Decision;

/// Lifecycle state of a work item
///
/// # State Machine
///
/// ```text
/// ┌───────────┐     ┌──────────┐ ──► Completed | Failed | FatalTimeout
/// │ Submitted │ ──► │ InFlight │
/// └───────────┘     └──────────┘ ◄──► CapacityRetry (unbounded)
///                         ▲
///                         └─────────► NormalRetry (bounded)
///
/// Any non-terminal state may move to Aborted when the run is cancelled.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    /// Index assigned, waiting for a slot
    Submitted,
    /// Attempt executing
    InFlight,
    /// Waiting for re-admission after a capacity error
    CapacityRetry,
    /// Waiting for re-admission after a normal error
    NormalRetry,
    /// Terminal: call succeeded
    Completed,
    /// Terminal: retries exhausted or error not retryable
    Failed,
    /// Terminal: per-item deadline expired during capacity retries
    FatalTimeout,
    /// Terminal: run cancelled first
    Aborted,
}

impl ItemState {
    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::FatalTimeout | Self::Aborted
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        match self {
            Submitted => matches!(next, InFlight | Aborted),
            InFlight => matches!(
                next,
                CapacityRetry | NormalRetry | Completed | Failed | FatalTimeout | Aborted
            ),
            CapacityRetry => matches!(next, InFlight | FatalTimeout | Aborted),
            NormalRetry => matches!(next, InFlight | Aborted),
            Completed | Failed | FatalTimeout | Aborted => false,
        }
    }

    /// Terminal state implied by a terminal outcome
    pub fn from_terminal(kind: OutcomeKind) -> Self {
        match kind {
            OutcomeKind::Success => Self::Completed,
            OutcomeKind::CapacityError | OutcomeKind::NormalError => Self::Failed,
            OutcomeKind::FatalTimeout => Self::FatalTimeout,
            OutcomeKind::Aborted => Self::Aborted,
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::InFlight => write!(f, "in_flight"),
            Self::CapacityRetry => write!(f, "capacity_retry"),
            Self::NormalRetry => write!(f, "normal_retry"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::FatalTimeout => write!(f, "fatal_timeout"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// A submitted item plus its retry bookkeeping
#[derive(Debug)]
pub struct WorkItem<T> {
    submission_index: u64,
    payload: Arc<T>,
    state: ItemState,
    attempts: u32,
    attempt_count: u32,
    capacity_errors: u32,
    submitted_at: Instant,
    deadline: Option<Instant>,
}

impl<T> WorkItem<T> {
    /// Create an item submitted now
    ///
    /// `per_item_timeout` bounds how long the item may loop on capacity
    /// errors, measured from this moment.
    pub fn new(submission_index: u64, payload: T, per_item_timeout: Option<Duration>) -> Self {
        let submitted_at = Instant::now();
        Self {
            submission_index,
            payload: Arc::new(payload),
            state: ItemState::Submitted,
            attempts: 0,
            attempt_count: 0,
            capacity_errors: 0,
            submitted_at,
            deadline: per_item_timeout.map(|timeout| submitted_at + timeout),
        }
    }

    /// Position in the submitted sequence
    pub fn submission_index(&self) -> u64 {
        self.submission_index
    }

    /// Current lifecycle state
    pub fn state(&self) -> ItemState {
        self.state
    }

    /// Attempts made so far, capacity errors included
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Bounded attempts spent (capacity errors excluded)
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Capacity errors seen so far
    pub fn capacity_errors(&self) -> u32 {
        self.capacity_errors
    }

    /// Time since submission
    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Time left before the per-item deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Start a new attempt
    pub(crate) fn begin_attempt(
        &mut self,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> AttemptContext<T> {
        self.transition(ItemState::InFlight);
        self.attempts += 1;
        AttemptContext::new(
            run_id,
            self.submission_index,
            self.attempts,
            self.attempt_count,
            Arc::clone(&self.payload),
            cancel,
        )
    }

    /// Account for a classified attempt
    ///
    /// Capacity errors never consume a bounded attempt.
    pub(crate) fn record<R>(&mut self, outcome: &Outcome<R>) {
        match outcome {
            Outcome::CapacityError(_) => self.capacity_errors += 1,
            _ => self.attempt_count += 1,
        }
    }

    /// Move to the state implied by a retry decision
    pub(crate) fn apply(&mut self, decision: &Decision) {
        let next = match decision {
            Decision::Complete => ItemState::Completed,
            Decision::RetryCapacity => ItemState::CapacityRetry,
            Decision::RetryNormal { .. } => ItemState::NormalRetry,
            Decision::Fail => ItemState::Failed,
            Decision::TimeOut { .. } => ItemState::FatalTimeout,
        };
        self.transition(next);
    }

    /// Resolve as aborted, keeping the last error seen
    pub(crate) fn abort<R>(&mut self, last_error: Option<CallError>) -> Outcome<R> {
        self.transition(ItemState::Aborted);
        Outcome::Aborted(last_error)
    }

    /// Package the terminal outcome for the caller
    pub(crate) fn into_completion<R>(self, outcome: Outcome<R>) -> Completion<R> {
        Completion {
            submission_index: self.submission_index,
            attempts: self.attempts,
            attempt_count: self.attempt_count,
            capacity_errors: self.capacity_errors,
            elapsed: self.submitted_at.elapsed(),
            outcome,
        }
    }

    fn transition(&mut self, next: ItemState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal item transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ItemState::Completed.is_terminal());
        assert!(ItemState::Aborted.is_terminal());
        assert!(!ItemState::CapacityRetry.is_terminal());

        for terminal in [
            ItemState::Completed,
            ItemState::Failed,
            ItemState::FatalTimeout,
            ItemState::Aborted,
        ] {
            assert!(!terminal.can_transition_to(ItemState::InFlight));
        }
    }

    #[test]
    fn test_legal_transitions() {
        assert!(ItemState::Submitted.can_transition_to(ItemState::InFlight));
        assert!(ItemState::CapacityRetry.can_transition_to(ItemState::FatalTimeout));
        assert!(!ItemState::NormalRetry.can_transition_to(ItemState::FatalTimeout));
        assert!(!ItemState::Submitted.can_transition_to(ItemState::Completed));
    }

    #[tokio::test]
    async fn test_capacity_errors_do_not_consume_attempts() {
        let mut item = WorkItem::new(3, "row", None);
        let token = CancellationToken::new();
        let run_id = Uuid::now_v7();

        let ctx = item.begin_attempt(run_id, token.clone());
        assert_eq!(ctx.attempt, 1);
        item.record::<()>(&Outcome::CapacityError(CallError::capacity("busy")));
        item.apply(&Decision::RetryCapacity);

        let ctx = item.begin_attempt(run_id, token.clone());
        assert_eq!(ctx.attempt, 2);
        assert_eq!(ctx.attempt_count, 0);
        item.record::<()>(&Outcome::NormalError(CallError::retryable("500")));
        item.apply(&Decision::RetryNormal {
            backoff: Duration::ZERO,
        });

        item.begin_attempt(run_id, token);
        item.record(&Outcome::Success(()));
        item.apply(&Decision::Complete);

        assert_eq!(item.attempts(), 3);
        assert_eq!(item.attempt_count(), 2);
        assert_eq!(item.capacity_errors(), 1);
        assert_eq!(item.state(), ItemState::Completed);

        let completion = item.into_completion(Outcome::Success(()));
        assert_eq!(completion.submission_index, 3);
        assert_eq!(completion.state(), ItemState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_remaining() {
        let item = WorkItem::new(0, (), Some(Duration::from_millis(500)));
        assert_eq!(item.remaining(), Some(Duration::from_millis(500)));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(item.remaining(), Some(Duration::from_millis(300)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(item.remaining(), Some(Duration::ZERO));

        assert!(WorkItem::new(1, (), None).remaining().is_none());
    }
}
