//! Tracing-backed audit hook

use async_trait::async_trait;
use tracing::{info, warn};

use super::{AttemptDisposition, AttemptRecord, AuditError, AuditHook};

/// Audit hook that writes each attempt to the `tracing` log
///
/// Terminal failures and timeouts log at `warn`, everything else at `info`.
/// This is the dispatcher's default hook when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditHook;

#[async_trait]
impl AuditHook for TracingAuditHook {
    async fn record_attempt(&self, record: AttemptRecord) -> Result<(), AuditError> {
        let error = record.error.as_ref().map(ToString::to_string);
        match record.disposition {
            AttemptDisposition::Failed | AttemptDisposition::FatalTimeout => warn!(
                run_id = %record.run_id,
                submission_index = record.submission_index,
                attempt = record.attempt,
                attempt_count = record.attempt_count,
                outcome = %record.outcome,
                disposition = ?record.disposition,
                latency_ms = record.latency.as_millis() as u64,
                error = error.as_deref(),
                "Attempt audit"
            ),
            _ => info!(
                run_id = %record.run_id,
                submission_index = record.submission_index,
                attempt = record.attempt,
                attempt_count = record.attempt_count,
                outcome = %record.outcome,
                disposition = ?record.disposition,
                latency_ms = record.latency.as_millis() as u64,
                error = error.as_deref(),
                "Attempt audit"
            ),
        }
        Ok(())
    }
}
