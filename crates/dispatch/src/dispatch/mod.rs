//! Run orchestration
//!
//! - [`Dispatcher`] - configures and starts runs
//! - [`OutcomeStream`] - yields each item's completion in submission order
//! - [`ReorderBuffer`] - index-keyed buffer behind the stream
//!
//! A run is driven by one task that assigns indices and admits items as
//! slots free up, plus one task per admitted item. Completions flow back over
//! a channel together with the item's slot, so a slot is only freed once the
//! caller has received that item. This keeps the reorder buffer below
//! `pool_size` entries.

pub(crate) mod admission;
mod dispatcher;
mod reorder;
pub(crate) mod stats;
pub(crate) mod stream;

pub use dispatcher::{DispatchError, Dispatcher};
pub use reorder::{ReorderBuffer, ReorderError};
pub use stats::RunStatsSnapshot;
pub use stream::OutcomeStream;

pub use crate::outcome::Completion;
