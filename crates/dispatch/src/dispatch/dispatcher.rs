//! Dispatcher and run driver

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::admission::AdmissionGate;
use super::reorder::ReorderError;
use super::stats::RunStats;
use super::stream::{Message, OutcomeStream};
use crate::audit::{AuditError, AuditHook, TracingAuditHook};
use crate::call::{into_handler, AttemptContext, CallResult};
use crate::config::{ConfigError, DispatchConfig};
use crate::reliability::{
    CapacityClassifier, CapacitySignals, RetryClassifier, ThrottleController, ThrottleState,
};
use crate::worker::runner::ItemRunner;
use crate::worker::{WorkItem, WorkerPool};

/// Run-level failures
///
/// Per-item failures never surface here; they are outcomes.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("audit hook failed for item {submission_index} attempt {attempt}")]
    Audit {
        submission_index: u64,
        attempt: u32,
        #[source]
        source: AuditError,
    },

    #[error("worker for item {submission_index} panicked: {message}")]
    WorkerPanicked { submission_index: u64, message: String },

    #[error(transparent)]
    Reorder(#[from] ReorderError),

    #[error("dispatch run ended before every item was accounted for")]
    Interrupted,
}

/// Bounded-concurrency executor with ordered output
///
/// The throttle is shared by every run started from this dispatcher (and its
/// clones); each [`submit`](Self::submit) gets its own pool of
/// `pool_size` slots.
///
/// # Example
///
/// ```ignore
/// let dispatcher = Dispatcher::new(DispatchConfig::default().with_pool_size(4))?
///     .with_audit_hook(Arc::new(InMemoryAuditLog::new()));
///
/// let mut outcomes = dispatcher.submit(vec![1, 2, 3], |ctx| async move {
///     Ok::<_, CallError>(*ctx.payload() * 2)
/// });
/// while let Some(completion) = outcomes.try_next().await? {
///     println!("{} -> {:?}", completion.submission_index, completion.outcome);
/// }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
    throttle: Arc<ThrottleController>,
    classifier: Arc<RetryClassifier>,
    audit: Arc<dyn AuditHook>,
    /// Admission turn shared by every run, see [`AdmissionGate`]
    turn: Arc<tokio::sync::Mutex<()>>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("throttle", &self.throttle.state())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// Defaults to [`CapacitySignals`] for capacity detection and
    /// [`TracingAuditHook`] for auditing.
    pub fn new(config: DispatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let throttle = ThrottleController::from_config(&config)?;
        let classifier = RetryClassifier::new(Arc::new(CapacitySignals::default()), config.retry.clone());

        Ok(Self {
            config,
            throttle: Arc::new(throttle),
            classifier: Arc::new(classifier),
            audit: Arc::new(TracingAuditHook),
            turn: Arc::new(tokio::sync::Mutex::new(())),
            shutdown: tokio_util::sync::CancellationToken::new(),
        })
    }

    /// Replace the capacity-error predicate
    pub fn with_capacity_classifier(mut self, classifier: impl CapacityClassifier + 'static) -> Self {
        self.classifier = Arc::new(RetryClassifier::new(
            Arc::new(classifier),
            self.config.retry.clone(),
        ));
        self
    }

    /// Replace the audit hook
    pub fn with_audit_hook(mut self, hook: Arc<dyn AuditHook>) -> Self {
        self.audit = hook;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Shared throttle
    pub fn throttle(&self) -> &Arc<ThrottleController> {
        &self.throttle
    }

    pub fn throttle_state(&self) -> ThrottleState {
        self.throttle.state()
    }

    /// Cancel every run, current and future
    pub fn shutdown(&self) {
        info!("Dispatcher shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start a run over `items`, calling `operation` once per attempt
    ///
    /// Items are pulled from the input lazily, one per free slot. Must be
    /// called from within a Tokio runtime. If the run is cancelled, the rest
    /// of the input is counted so each item still yields an aborted
    /// completion; the input must therefore be finite.
    pub fn submit<I, T, R, F, Fut>(&self, items: I, operation: F) -> OutcomeStream<R>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(AttemptContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<R>> + Send + 'static,
    {
        let run_id = Uuid::now_v7();
        let cancel = self.shutdown.child_token();
        let gate = AdmissionGate::new(
            Arc::clone(&self.throttle),
            Arc::clone(&self.turn),
            cancel.clone(),
        );
        let pool = WorkerPool::new(self.config.pool_size);
        let stats = Arc::new(RunStats::default());
        let load = Arc::clone(pool.load());
        let (tx, rx) = mpsc::unbounded_channel();

        let runner = Arc::new(ItemRunner {
            run_id,
            handler: into_handler(operation),
            classifier: Arc::clone(&self.classifier),
            throttle: Arc::clone(&self.throttle),
            audit: Arc::clone(&self.audit),
            gate,
            attempt_timeout: self.config.attempt_timeout,
            load: Arc::clone(&load),
            stats: Arc::clone(&stats),
            tx: tx.clone(),
        });

        let driver = Driver {
            items: items.into_iter(),
            runner,
            pool,
            per_item_timeout: self.config.per_item_timeout,
            tx,
        };
        let span = info_span!("dispatch_run", %run_id, pool_size = self.config.pool_size);
        tokio::spawn(driver.run().instrument(span));

        OutcomeStream::new(run_id, rx, cancel, stats, load)
    }
}

/// Assigns submission indices and admits items as slots free up
struct Driver<I, T, R> {
    items: I,
    runner: Arc<ItemRunner<T, R>>,
    pool: WorkerPool,
    per_item_timeout: Option<Duration>,
    tx: mpsc::UnboundedSender<Message<R>>,
}

impl<I, T, R> Driver<I, T, R>
where
    I: Iterator<Item = T> + Send + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn run(self) {
        let Self {
            items,
            runner,
            pool,
            per_item_timeout,
            tx,
        } = self;
        let gate = &runner.gate;
        let mut items = items.fuse();
        let mut next_index: u64 = 0;

        info!("Dispatch run started");

        loop {
            let slot = tokio::select! {
                biased;
                _ = gate.cancelled() => break,
                slot = pool.acquire_slot() => match slot {
                    Some(slot) => slot,
                    None => break,
                },
            };
            let Some(payload) = items.next() else {
                break;
            };

            let mut item = WorkItem::new(next_index, payload, per_item_timeout);
            next_index += 1;
            runner.stats.record_submitted();

            if !gate.admit(Duration::ZERO).await {
                let outcome = item.abort(None);
                runner.stats.record_resolution(outcome.kind());
                let completion = item.into_completion(outcome);
                if tx.send(Message::Resolved { completion, slot }).is_err() {
                    debug!("Outcome stream dropped");
                }
                break;
            }

            pool.spawn(Arc::clone(&runner), item, slot);
        }

        let unadmitted = items.count() as u64;
        let total = next_index + unadmitted;
        info!(
            admitted = next_index,
            unadmitted,
            cancelled = gate.is_cancelled(),
            "Dispatch run closed to new items"
        );
        let closed = Message::Closed {
            admitted: next_index,
            total,
        };
        if tx.send(closed).is_err() {
            debug!("Outcome stream dropped before close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallError;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let err = Dispatcher::new(DispatchConfig::default().with_backoff_multiplier(1.0));
        assert!(matches!(err, Err(ConfigError::InvalidBackoffMultiplier(_))));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
        let outcomes: Vec<_> = dispatcher
            .submit(Vec::<u32>::new(), |_ctx| async { Ok::<_, CallError>(()) })
            .try_collect()
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_future_runs() {
        let dispatcher = Dispatcher::new(DispatchConfig::default().with_pool_size(2)).unwrap();
        dispatcher.shutdown();
        assert!(dispatcher.is_shutdown());

        let outcomes: Vec<_> = dispatcher
            .submit(0..3u32, |_ctx| async { Ok::<_, CallError>(()) })
            .try_collect()
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|c| c.outcome == crate::outcome::Outcome::Aborted(None)));
    }

    #[tokio::test]
    async fn test_throttle_shared_across_clones() {
        let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
        let clone = dispatcher.clone();
        dispatcher.throttle().on_capacity_error();
        assert_eq!(
            clone.throttle_state().current_delay,
            Duration::from_millis(200)
        );
    }
}
