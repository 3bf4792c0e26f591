//! Attempt record

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::call::CallError;
use crate::config::duration_millis;
use crate::outcome::OutcomeKind;

/// What the dispatcher did with the item after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptDisposition {
    /// Item completed successfully
    Completed,
    /// Item re-queued after a capacity error
    CapacityRetry,
    /// Item re-queued after a normal error
    NormalRetry,
    /// Item failed terminally
    Failed,
    /// Item exceeded its capacity-retry deadline
    FatalTimeout,
}

impl AttemptDisposition {
    /// Whether the item reached a terminal state with this attempt
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::CapacityRetry | Self::NormalRetry)
    }
}

/// Audit record for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Run the item belongs to
    pub run_id: Uuid,

    /// Item identity within the run
    pub submission_index: u64,

    /// Attempt sequence number for the item (1-based, counts every attempt)
    pub attempt: u32,

    /// Bounded attempts spent after this attempt (capacity errors excluded)
    pub attempt_count: u32,

    /// Outcome classification
    pub outcome: OutcomeKind,

    /// What happened to the item next
    pub disposition: AttemptDisposition,

    /// Time spent in the operation
    #[serde(rename = "latency_ms", with = "duration_millis")]
    pub latency: Duration,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// Error detail for failed attempts
    pub error: Option<CallError>,
}
