//! Attempt auditing
//!
//! Every attempt, successful or not, is handed to an [`AuditHook`] as an
//! [`AttemptRecord`]. Storage is the hook's concern; the dispatcher only
//! requires that the hook accepts the record. A hook error is treated as fatal
//! to the whole run.
//!
//! Provided hooks:
//! - [`InMemoryAuditLog`] - keeps records in memory (tests, small runs)
//! - [`TracingAuditHook`] - writes records to the `tracing` log (default)

mod log;
mod memory;
mod record;

pub use log::TracingAuditHook;
pub use memory::InMemoryAuditLog;
pub use record::{AttemptDisposition, AttemptRecord};

use async_trait::async_trait;

/// Error returned by an audit hook
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("audit hook rejected attempt record: {message}")]
pub struct AuditError {
    /// Error message
    pub message: String,
}

impl AuditError {
    /// Create a new audit error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for AuditError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Receives one record per attempt
///
/// # Example
///
/// ```ignore
/// struct WarehouseAudit { client: WarehouseClient }
///
/// #[async_trait]
/// impl AuditHook for WarehouseAudit {
///     async fn record_attempt(&self, record: AttemptRecord) -> Result<(), AuditError> {
///         self.client.insert("attempts", &record).await.map_err(AuditError::from)
///     }
/// }
/// ```
#[async_trait]
pub trait AuditHook: Send + Sync {
    /// Record a single attempt
    async fn record_attempt(&self, record: AttemptRecord) -> Result<(), AuditError>;
}
