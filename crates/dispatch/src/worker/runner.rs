//! Per-item attempt loop
//!
//! Runs one admitted item until it reaches a terminal state: execute the
//! operation, classify the result, feed the throttle, audit the attempt, then
//! either resolve or go back through the admission gate.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::load::LoadTracker;
use super::WorkItem;
use crate::audit::{AttemptRecord, AuditHook};
use crate::call::{AttemptContext, CallError, CallHandler, CallResult};
use crate::dispatch::admission::AdmissionGate;
use crate::dispatch::stats::RunStats;
use crate::dispatch::stream::Message;
use crate::dispatch::DispatchError;
use crate::outcome::Outcome;
use crate::reliability::{Decision, RetryClassifier, ThrottleController};

/// Everything an item task needs, shared by all items of a run
pub(crate) struct ItemRunner<T, R> {
    pub(crate) run_id: Uuid,
    pub(crate) handler: CallHandler<T, R>,
    pub(crate) classifier: Arc<RetryClassifier>,
    pub(crate) throttle: Arc<ThrottleController>,
    pub(crate) audit: Arc<dyn AuditHook>,
    pub(crate) gate: AdmissionGate,
    pub(crate) attempt_timeout: Option<Duration>,
    pub(crate) load: Arc<LoadTracker>,
    pub(crate) stats: Arc<RunStats>,
    pub(crate) tx: mpsc::UnboundedSender<Message<R>>,
}

impl<T, R> ItemRunner<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Drive the item to a terminal state and hand it to the outcome stream
    ///
    /// The slot travels with the completion and is released only once the
    /// caller has received it. A panic outside the operation itself (audit
    /// hook, classifier) is fatal to the run.
    pub(crate) async fn run(self: Arc<Self>, mut item: WorkItem<T>, slot: OwnedSemaphorePermit) {
        let submission_index = item.submission_index();

        let driven = AssertUnwindSafe(self.drive(&mut item)).catch_unwind().await;
        let message = match driven {
            Ok(Ok(outcome)) => {
                self.stats.record_resolution(outcome.kind());
                Message::Resolved {
                    completion: item.into_completion(outcome),
                    slot,
                }
            }
            Ok(Err(err)) => self.abort_run(err, slot),
            Err(panic) => self.abort_run(
                DispatchError::WorkerPanicked {
                    submission_index,
                    message: panic_message(panic.as_ref()).to_string(),
                },
                slot,
            ),
        };

        if self.tx.send(message).is_err() {
            debug!(submission_index, "Outcome stream dropped, discarding result");
        }
    }

    fn abort_run(&self, err: DispatchError, slot: OwnedSemaphorePermit) -> Message<R> {
        error!(error = %err, "Aborting dispatch run");
        self.gate.cancel();
        drop(slot);
        Message::Fatal(err)
    }

    async fn drive(&self, item: &mut WorkItem<T>) -> Result<Outcome<R>, DispatchError> {
        loop {
            let ctx = item.begin_attempt(self.run_id, self.gate.token());
            let attempt = ctx.attempt;
            let started_at = Utc::now();
            let started = Instant::now();

            let result = {
                let _load = self.load.enter();
                self.execute(ctx).await
            };
            let latency = started.elapsed();
            self.stats.record_attempt();

            let outcome = self.classifier.classify(result);
            let next_delay = match &outcome {
                Outcome::Success(_) => self.throttle.on_success(),
                Outcome::CapacityError(_) => self.throttle.on_capacity_error(),
                _ => self.throttle.current_delay(),
            };

            item.record(&outcome);
            let decision = self.classifier.decide(
                &outcome,
                item.attempt_count(),
                item.remaining(),
                next_delay,
            );
            let outcome = match decision {
                Decision::TimeOut { .. } => outcome.into_timeout(),
                _ => outcome,
            };
            item.apply(&decision);

            let record = AttemptRecord {
                run_id: self.run_id,
                submission_index: item.submission_index(),
                attempt,
                attempt_count: item.attempt_count(),
                outcome: outcome.kind(),
                disposition: decision.disposition(),
                latency,
                started_at,
                error: outcome.error().cloned(),
            };
            self.report(record).await?;

            match decision {
                Decision::Complete | Decision::Fail => return Ok(outcome),
                Decision::TimeOut { wait } => {
                    warn!(
                        submission_index = item.submission_index(),
                        capacity_errors = item.capacity_errors(),
                        elapsed_ms = item.elapsed().as_millis() as u64,
                        "Per-item deadline exhausted by capacity errors"
                    );
                    // No further attempt fits before the deadline; hold until it passes
                    if !self.gate.sleep(wait).await {
                        debug!("Run cancelled while waiting out the deadline");
                    }
                    return Ok(outcome);
                }
                Decision::RetryCapacity => {
                    self.stats.record_capacity_retry();
                    debug!(
                        attempt,
                        delay_ms = next_delay.as_millis() as u64,
                        "Capacity error, re-queueing"
                    );
                    if !self.gate.admit(Duration::ZERO).await {
                        return Ok(item.abort(outcome.into_error()));
                    }
                }
                Decision::RetryNormal { backoff } => {
                    self.stats.record_normal_retry();
                    debug!(
                        attempt,
                        attempt_count = item.attempt_count(),
                        backoff_ms = backoff.as_millis() as u64,
                        "Call failed, retrying"
                    );
                    if !self.gate.admit(backoff).await {
                        return Ok(item.abort(outcome.into_error()));
                    }
                }
            }
        }
    }

    /// Run the operation once, bounded by the attempt timeout
    ///
    /// A panicking operation becomes a non-retryable error for this item only.
    async fn execute(&self, ctx: AttemptContext<T>) -> CallResult<R> {
        let handler = Arc::clone(&self.handler);
        let call = AssertUnwindSafe(async move { handler(ctx).await }).catch_unwind();

        let result = match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => return Err(CallError::attempt_timeout(limit)),
            },
            None => call.await,
        };

        result.unwrap_or_else(|panic| {
            Err(CallError::panicked(format!(
                "operation panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    async fn report(&self, record: AttemptRecord) -> Result<(), DispatchError> {
        let submission_index = record.submission_index;
        let attempt = record.attempt;
        self.audit
            .record_attempt(record)
            .await
            .map_err(|source| DispatchError::Audit {
                submission_index,
                attempt,
                source,
            })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
