//! Worker pool
//!
//! Fixed set of execution slots. A slot is a semaphore permit taken at
//! admission; each admitted item runs in its own task while holding it.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug_span, Instrument};

use super::load::LoadTracker;
use super::runner::ItemRunner;
use super::WorkItem;

/// Bounded pool of execution slots
///
/// The semaphore is the sole back-pressure mechanism: there is no internal
/// queue of admitted items waiting for a slot.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    slots: Arc<Semaphore>,
    load: Arc<LoadTracker>,
}

impl WorkerPool {
    /// Create a pool with `size` slots (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            slots: Arc::new(Semaphore::new(size)),
            load: Arc::new(LoadTracker::new(size)),
        }
    }

    /// Number of slots
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Executing-attempt tracker shared with the runners
    pub fn load(&self) -> &Arc<LoadTracker> {
        &self.load
    }

    /// Wait for a free slot
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).acquire_owned().await.ok()
    }

    /// Run an admitted item on its own task
    pub(crate) fn spawn<T, R>(
        &self,
        runner: Arc<ItemRunner<T, R>>,
        item: WorkItem<T>,
        slot: OwnedSemaphorePermit,
    ) -> JoinHandle<()>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let span = debug_span!(
            "dispatch_item",
            run_id = %runner.run_id,
            submission_index = item.submission_index()
        );
        tokio::spawn(runner.run(item, slot).instrument(span))
    }
}
