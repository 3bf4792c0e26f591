//! Attempt execution context

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context handed to the operation on every attempt
///
/// The context provides:
/// - The item payload (shared across attempts, never cloned)
/// - Information about the current attempt
/// - Cancellation detection for long-running calls
///
/// # Example
///
/// ```ignore
/// dispatcher.submit(rows, |ctx: AttemptContext<Row>| async move {
///     if ctx.is_cancelled() {
///         return Err(CallError::non_retryable("run cancelled"));
///     }
///     client.enrich(ctx.payload()).await.map_err(CallError::from)
/// });
/// ```
pub struct AttemptContext<T> {
    /// Run that owns this item
    pub run_id: Uuid,

    /// Position of the item in the submitted sequence
    pub submission_index: u64,

    /// Attempt sequence number for this item (1-based, counts every attempt)
    pub attempt: u32,

    /// Bounded attempts already spent (capacity-error attempts excluded)
    pub attempt_count: u32,

    payload: Arc<T>,
    cancel: CancellationToken,
}

impl<T> AttemptContext<T> {
    pub(crate) fn new(
        run_id: Uuid,
        submission_index: u64,
        attempt: u32,
        attempt_count: u32,
        payload: Arc<T>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            submission_index,
            attempt,
            attempt_count,
            payload,
            cancel,
        }
    }

    /// Borrow the item payload
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Shared handle to the item payload
    pub fn payload_arc(&self) -> Arc<T> {
        Arc::clone(&self.payload)
    }

    /// Whether this attempt is a retry
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// Check whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl<T> Clone for AttemptContext<T> {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id,
            submission_index: self.submission_index,
            attempt: self.attempt,
            attempt_count: self.attempt_count,
            payload: Arc::clone(&self.payload),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> std::fmt::Debug for AttemptContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptContext")
            .field("run_id", &self.run_id)
            .field("submission_index", &self.submission_index)
            .field("attempt", &self.attempt)
            .field("attempt_count", &self.attempt_count)
            .finish_non_exhaustive()
    }
}
