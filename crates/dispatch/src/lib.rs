//! # Ordered Dispatch Engine
//!
//! A bounded-concurrency executor for calls to a slow, rate-limited external service.
//!
//! ## Features
//!
//! - **Ordered results**: outcomes are yielded strictly in submission order, whatever order calls finish in
//! - **Bounded concurrency**: at most `pool_size` items hold a worker slot at any instant
//! - **Adaptive throttling**: one shared dispatch delay, multiplied on capacity errors and stepped down on success
//! - **Differentiated retries**: capacity errors retry without a count limit (optionally bounded by a per-item deadline), real failures retry per [`RetryPolicy`]
//! - **Attempt auditing**: every attempt is reported to an [`AuditHook`]; a failing hook aborts the run
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                            │
//! │  (assigns submission indices, acquires slots, throttles)    │
//! └─────────────────────────────────────────────────────────────┘
//!          │  admit                         ▲ re-admit (retry)
//!          ▼                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  WorkerPool / ItemRunner                     │
//! │  (executes the operation, classifies, drives ThrottleCtl)   │
//! └─────────────────────────────────────────────────────────────┘
//!          │  terminal outcome (+ slot permit)
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               OutcomeStream / ReorderBuffer                  │
//! │  (releases completions in submission order, frees slots)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use everruns_dispatch::prelude::*;
//! use futures::TryStreamExt;
//!
//! let dispatcher = Dispatcher::new(DispatchConfig::default().with_pool_size(8))?
//!     .with_capacity_classifier(CapacitySignals::default());
//!
//! let outcomes: Vec<Completion<String>> = dispatcher
//!     .submit(rows, |ctx: AttemptContext<Row>| async move {
//!         call_service(ctx.payload()).await
//!     })
//!     .try_collect()
//!     .await?;
//! ```

pub mod audit;
pub mod call;
pub mod config;
pub mod dispatch;
pub mod outcome;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::audit::{
        AttemptDisposition, AttemptRecord, AuditError, AuditHook, InMemoryAuditLog,
        TracingAuditHook,
    };
    pub use crate::call::{AttemptContext, CallError, CallResult};
    pub use crate::config::{ConfigError, DispatchConfig};
    pub use crate::dispatch::{
        Completion, DispatchError, Dispatcher, OutcomeStream, ReorderBuffer, RunStatsSnapshot,
    };
    pub use crate::outcome::{Outcome, OutcomeKind};
    pub use crate::reliability::{
        CapacityClassifier, CapacitySignals, RetryClassifier, RetryPolicy, ThrottleController,
        ThrottleState,
    };
    pub use crate::worker::{ItemState, WorkerPool};
}

// Re-export key types at crate root
pub use audit::{
    AttemptDisposition, AttemptRecord, AuditError, AuditHook, InMemoryAuditLog, TracingAuditHook,
};
pub use call::{AttemptContext, CallError, CallResult};
pub use config::{ConfigError, DispatchConfig};
pub use dispatch::{Completion, DispatchError, Dispatcher, OutcomeStream};
pub use outcome::{Outcome, OutcomeKind};
pub use reliability::{
    CapacityClassifier, CapacitySignals, RetryClassifier, RetryPolicy, ThrottleController,
    ThrottleState,
};
