//! Admission gate
//!
//! Every admission, first attempt or retry, waits out the current throttle
//! delay here. Admissions take turns: the delay is waited while holding the
//! dispatcher-wide turn lock, so dispatches are spaced by the delay across the
//! whole pool rather than per slot. Waits are cancellable so a cancelled run
//! never admits new work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::reliability::ThrottleController;

/// Applies the shared dispatch delay before an attempt starts
#[derive(Debug, Clone)]
pub(crate) struct AdmissionGate {
    throttle: Arc<ThrottleController>,
    turn: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl AdmissionGate {
    pub(crate) fn new(
        throttle: Arc<ThrottleController>,
        turn: Arc<Mutex<()>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            throttle,
            turn,
            cancel,
        }
    }

    /// Run cancellation token handed to attempts
    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the run is cancelled
    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Wait `backoff`, then take a turn and wait the current throttle delay
    ///
    /// The backoff is private to the caller and waited outside the turn. The
    /// throttle delay is read once the turn is held. Returns `false` if the
    /// run was cancelled first.
    pub(crate) async fn admit(&self, backoff: Duration) -> bool {
        if !self.sleep(backoff).await {
            return false;
        }
        let _turn = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            turn = self.turn.lock() => turn,
        };
        let delay = self.throttle.current_delay();
        trace!(delay_ms = delay.as_millis() as u64, "Admission wait");
        self.sleep(delay).await
    }

    /// Sleep unless cancelled; returns `false` on cancellation
    pub(crate) async fn sleep(&self, wait: Duration) -> bool {
        if wait.is_zero() {
            return !self.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}
