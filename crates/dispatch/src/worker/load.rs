//! Executing-attempt load tracking
//!
//! Counts attempts currently inside the external operation. Uses atomic
//! operations for thread-safe access without locks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks how many attempts are executing and the highest count observed
#[derive(Debug)]
pub struct LoadTracker {
    current_load: AtomicUsize,
    peak_load: AtomicUsize,
    max_concurrency: usize,
}

impl LoadTracker {
    /// Create a tracker for a pool of `max_concurrency` slots
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            current_load: AtomicUsize::new(0),
            peak_load: AtomicUsize::new(0),
            max_concurrency,
        }
    }

    /// Record that an attempt has started
    pub fn task_started(&self) {
        let load = self.current_load.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_load.fetch_max(load, Ordering::AcqRel);
    }

    /// Record that an attempt has finished
    pub fn task_completed(&self) {
        self.current_load.fetch_sub(1, Ordering::AcqRel);
    }

    /// Track an attempt for as long as the guard lives
    pub fn enter(self: &Arc<Self>) -> LoadGuard {
        self.task_started();
        LoadGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Attempts executing right now
    pub fn current_load(&self) -> usize {
        self.current_load.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously executing attempts
    pub fn peak_load(&self) -> usize {
        self.peak_load.load(Ordering::Acquire)
    }

    /// Get the maximum concurrency
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Get the load ratio (current_load / max_concurrency)
    pub fn load_ratio(&self) -> f64 {
        self.current_load() as f64 / self.max_concurrency.max(1) as f64
    }
}

/// Decrements the tracker when dropped, including on panic or cancellation
#[derive(Debug)]
pub struct LoadGuard {
    tracker: Arc<LoadTracker>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.tracker.task_completed();
    }
}
