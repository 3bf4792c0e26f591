//! Worker pool for call execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed set of execution slots (semaphore-limited)
//! - [`LoadTracker`] - Lock-free count of executing attempts and its peak
//! - [`WorkItem`] / [`ItemState`] - Per-item retry state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        Slots (Semaphore, pool_size permits)          │    │
//! │  │  permit held from admission until the caller         │    │
//! │  │  receives the item's outcome                         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │               ItemRunner (per item task)             │    │
//! │  │  attempt → classify → throttle → audit → decide      │    │
//! │  │     ▲                                    │           │    │
//! │  │     └────── re-admit (AdmissionGate) ◄───┘           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod item;
mod load;
mod pool;
pub(crate) mod runner;

pub use item::{ItemState, WorkItem};
pub use load::{LoadGuard, LoadTracker};
pub use pool::WorkerPool;
