//! Per-run counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::outcome::OutcomeKind;
use crate::worker::LoadTracker;

/// Lock-free counters updated by the driver and item tasks
#[derive(Debug, Default)]
pub(crate) struct RunStats {
    submitted: AtomicU64,
    attempts: AtomicU64,
    capacity_retries: AtomicU64,
    normal_retries: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    aborted: AtomicU64,
}

impl RunStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capacity_retry(&self) {
        self.capacity_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_normal_retry(&self) {
        self.normal_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resolution(&self, kind: OutcomeKind) {
        let counter = match kind {
            OutcomeKind::Success => &self.completed,
            OutcomeKind::CapacityError | OutcomeKind::NormalError => &self.failed,
            OutcomeKind::FatalTimeout => &self.timed_out,
            OutcomeKind::Aborted => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        load: &LoadTracker,
        buffered: usize,
        peak_buffered: usize,
    ) -> RunStatsSnapshot {
        RunStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            capacity_retries: self.capacity_retries.load(Ordering::Relaxed),
            normal_retries: self.normal_retries.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            pool_size: load.max_concurrency(),
            in_flight: load.current_load(),
            peak_in_flight: load.peak_load(),
            load_ratio: load.load_ratio(),
            buffered,
            peak_buffered,
        }
    }
}

/// Point-in-time view of a run
///
/// `aborted` counts items resolved as aborted by their own task; items never
/// admitted before cancellation are not included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunStatsSnapshot {
    pub submitted: u64,
    pub attempts: u64,
    pub capacity_retries: u64,
    pub normal_retries: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub aborted: u64,
    pub pool_size: usize,
    /// Attempts executing right now
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// `in_flight / pool_size`
    pub load_ratio: f64,
    /// Completions held back by the reorder buffer
    pub buffered: usize,
    pub peak_buffered: usize,
}
