//! Ordered outcome stream
//!
//! Receives terminal completions from item tasks in whatever order they
//! finish and yields them to the caller strictly by submission index.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::reorder::ReorderBuffer;
use super::stats::{RunStats, RunStatsSnapshot};
use super::DispatchError;
use crate::outcome::Completion;
use crate::worker::LoadTracker;

/// Messages from the driver and item tasks to the stream
pub(crate) enum Message<R> {
    /// An item reached a terminal state; its slot is released on emission
    Resolved {
        completion: Completion<R>,
        slot: OwnedSemaphorePermit,
    },
    /// The driver stopped after admitting `admitted` items; `total` also
    /// counts the unadmitted rest of the input
    Closed { admitted: u64, total: u64 },
    /// The run cannot continue
    Fatal(DispatchError),
}

type Held<R> = (Completion<R>, Option<OwnedSemaphorePermit>);

/// Stream of item completions in submission order
///
/// Yields exactly one [`Completion`] per submitted item, then ends. Items
/// that were never admitted because the run was cancelled are yielded as
/// `Outcome::Aborted(None)`. An `Err` is yielded at most once and ends the
/// stream.
///
/// Dropping the stream cancels the run.
pub struct OutcomeStream<R> {
    run_id: Uuid,
    rx: mpsc::UnboundedReceiver<Message<R>>,
    buffer: ReorderBuffer<Held<R>>,
    total: Option<u64>,
    admitted: u64,
    disconnected: bool,
    finished: bool,
    cancel: CancellationToken,
    stats: Arc<RunStats>,
    load: Arc<LoadTracker>,
}

impl<R> OutcomeStream<R> {
    pub(crate) fn new(
        run_id: Uuid,
        rx: mpsc::UnboundedReceiver<Message<R>>,
        cancel: CancellationToken,
        stats: Arc<RunStats>,
        load: Arc<LoadTracker>,
    ) -> Self {
        Self {
            run_id,
            rx,
            buffer: ReorderBuffer::new(),
            total: None,
            admitted: 0,
            disconnected: false,
            finished: false,
            cancel,
            stats,
            load,
        }
    }

    /// Identifier of this run, as carried by its audit records
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stop admitting work
    ///
    /// Attempts already executing run to completion; items waiting for a
    /// retry or never admitted resolve as aborted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completions received but held back behind an earlier item
    pub fn held_back(&self) -> usize {
        self.buffer.len()
    }

    /// Number of submitted items, known once the input is exhausted
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Counters for this run
    pub fn stats(&self) -> RunStatsSnapshot {
        self.stats
            .snapshot(&self.load, self.buffer.len(), self.buffer.peak_len())
    }

    fn fail(&mut self, err: DispatchError) -> Poll<Option<Result<Completion<R>, DispatchError>>> {
        self.finished = true;
        self.cancel.cancel();
        self.rx.close();
        Poll::Ready(Some(Err(err)))
    }
}

impl<R> Unpin for OutcomeStream<R> {}

impl<R> Stream for OutcomeStream<R> {
    type Item = Result<Completion<R>, DispatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            if let Some((completion, slot)) = this.buffer.pop_ready() {
                // Emission frees the slot for the next admission
                drop(slot);
                return Poll::Ready(Some(Ok(completion)));
            }

            if let Some(total) = this.total {
                if this.buffer.cursor() >= total {
                    debug!(run_id = %this.run_id, total, "Dispatch run drained");
                    this.finished = true;
                    return Poll::Ready(None);
                }
            }

            if this.disconnected {
                let Some(total) = this.total else {
                    warn!(run_id = %this.run_id, "Dispatch driver stopped without closing the run");
                    return this.fail(DispatchError::Interrupted);
                };
                // Every sender is gone: an admitted index still missing lost its task
                let index = this.buffer.cursor();
                debug_assert!(index < total);
                if index < this.admitted {
                    warn!(run_id = %this.run_id, submission_index = index, "Admitted item never resolved");
                    return this.fail(DispatchError::Interrupted);
                }
                if let Err(err) = this.buffer.complete(index, (Completion::aborted(index), None)) {
                    return this.fail(err.into());
                }
                continue;
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Message::Resolved { completion, slot })) => {
                    let index = completion.submission_index;
                    if let Err(err) = this.buffer.complete(index, (completion, Some(slot))) {
                        return this.fail(err.into());
                    }
                }
                Poll::Ready(Some(Message::Closed { admitted, total })) => {
                    this.admitted = admitted;
                    this.total = Some(total);
                }
                Poll::Ready(Some(Message::Fatal(err))) => return this.fail(err),
                Poll::Ready(None) => this.disconnected = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<R> Drop for OutcomeStream<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<R> std::fmt::Debug for OutcomeStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeStream")
            .field("run_id", &self.run_id)
            .field("cursor", &self.buffer.cursor())
            .field("buffered", &self.buffer.len())
            .field("total", &self.total)
            .field("finished", &self.finished)
            .finish()
    }
}
