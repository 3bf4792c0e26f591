//! Call error type

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a single call attempt
pub type CallResult<R> = Result<R, CallError>;

/// Error type for call failures
///
/// The `code` is what capacity classifiers usually match on; the
/// `retryable` flag lets an operation opt out of bounded retries entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling (e.g. `RATE_LIMITED`)
    pub code: Option<String>,

    /// Whether this error may be retried
    ///
    /// Non-retryable errors fail the item without further attempts.
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl CallError {
    /// Code carried by [`CallError::capacity`]
    pub const CAPACITY_EXCEEDED: &'static str = "CAPACITY_EXCEEDED";
    /// Code carried by [`CallError::attempt_timeout`]
    pub const ATTEMPT_TIMEOUT: &'static str = "ATTEMPT_TIMEOUT";
    /// Code carried by [`CallError::panicked`]
    pub const OPERATION_PANICKED: &'static str = "OPERATION_PANICKED";

    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
            details: None,
        }
    }

    /// Create a transient-overload error recognized by the default capacity signals
    pub fn capacity(message: impl Into<String>) -> Self {
        Self::retryable(message).with_code(Self::CAPACITY_EXCEEDED)
    }

    /// Error for an attempt that exceeded its time limit
    pub fn attempt_timeout(limit: Duration) -> Self {
        Self::retryable(format!("attempt exceeded time limit of {limit:?}"))
            .with_code(Self::ATTEMPT_TIMEOUT)
    }

    /// Error for an operation future that panicked
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::non_retryable(message).with_code(Self::OPERATION_PANICKED)
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Error code, if any
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CallError {}

impl From<anyhow::Error> for CallError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}
