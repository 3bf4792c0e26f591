//! In-memory audit log

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AttemptRecord, AuditError, AuditHook};

/// Audit hook that keeps every record in memory
///
/// Useful for tests and for short runs that want to inspect per-item attempt
/// trails after the fact.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AttemptRecord>>,
}

impl InMemoryAuditLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, in the order they were reported
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().clone()
    }

    /// Attempt trail for one item, ordered by attempt number
    pub fn trail(&self, submission_index: u64) -> Vec<AttemptRecord> {
        let mut trail: Vec<_> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.submission_index == submission_index)
            .cloned()
            .collect();
        trail.sort_by_key(|r| r.attempt);
        trail
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no record was reported
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Remove all records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[async_trait]
impl AuditHook for InMemoryAuditLog {
    async fn record_attempt(&self, record: AttemptRecord) -> Result<(), AuditError> {
        self.records.lock().push(record);
        Ok(())
    }
}
