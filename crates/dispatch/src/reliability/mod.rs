//! Reliability patterns for external calls
//!
//! This module provides:
//! - [`ThrottleController`] - Shared adaptive dispatch delay
//! - [`RetryClassifier`] - Decides the fate of each attempt
//! - [`RetryPolicy`] - Bounded retry with exponential backoff
//! - [`CapacityClassifier`] - Detects transient-overload signals

mod classify;
mod retry;
mod throttle;

pub use classify::{CapacityClassifier, CapacitySignals, Decision, RetryClassifier};
pub use retry::RetryPolicy;
pub use throttle::{ThrottleController, ThrottleState};
