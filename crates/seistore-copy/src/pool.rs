//! Bounded-concurrency worker pool draining a [`JobQueue`].

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use seistore_core::config::{DEFAULT_COPY_CONCURRENCY, SeistoreConfig};
use seistore_core::error::{Error, Result};

use crate::metrics::{JobOutcome, record_job, register_metrics};
use crate::processor::{CopyProcessor, is_permanent_failure};
use crate::queue::{JobQueue, QueuedJob};

/// Runs copy jobs from a queue, at most `concurrency` at a time.
pub struct CopyWorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: CopyProcessor,
    concurrency: usize,
}

impl std::fmt::Debug for CopyWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyWorkerPool")
            .field("queue", &self.queue.name())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl CopyWorkerPool {
    /// Creates a pool with the default concurrency.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, processor: CopyProcessor) -> Self {
        register_metrics();
        Self {
            queue,
            processor,
            concurrency: DEFAULT_COPY_CONCURRENCY,
        }
    }

    /// Creates a pool sized by `config`.
    #[must_use]
    pub fn from_config(queue: Arc<dyn JobQueue>, processor: CopyProcessor, config: &SeistoreConfig) -> Self {
        Self::new(queue, processor).with_concurrency(config.copy_concurrency)
    }

    /// Sets the number of jobs run concurrently.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Processes jobs until the queue is closed and drained.
    ///
    /// A failing worker or queue call stops nothing already running: jobs in
    /// flight always finish their attempt, including lock cleanup, before
    /// the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first queue error, or an internal error if a worker task
    /// panicked.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut failure = None;
        tracing::info!(queue = self.queue.name(), concurrency = self.concurrency, "copy worker pool started");

        loop {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                failure.get_or_insert(Error::internal("worker pool semaphore closed"));
                break;
            };
            let queued = match self.queue.dequeue().await {
                Ok(Some(queued)) => queued,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(queue = self.queue.name(), error = %err, "copy job dequeue failed");
                    failure.get_or_insert(err);
                    break;
                }
            };
            let pool = Arc::clone(&self);
            workers.spawn(async move {
                let _permit = permit;
                pool.handle(queued).await
            });
            while let Some(done) = workers.try_join_next() {
                settle_worker(done, &mut failure);
            }
        }

        while let Some(done) = workers.join_next().await {
            settle_worker(done, &mut failure);
        }
        match failure {
            Some(err) => Err(err),
            None => {
                tracing::info!(queue = self.queue.name(), "copy worker pool drained");
                Ok(())
            }
        }
    }

    /// Runs one attempt and settles it with the queue. A failure is logged
    /// and handed to the queue for retry or terminal failure.
    async fn handle(&self, queued: QueuedJob) -> Result<()> {
        let started = Instant::now();
        let result = self.processor.process(&queued).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                record_job(JobOutcome::Completed, elapsed);
                self.queue.ack(queued.id).await
            }
            Err(err) => {
                let policy = self.queue.retry_policy();
                if !is_permanent_failure(&err) && policy.allows_retry(queued.attempt) {
                    tracing::warn!(
                        job_id = %queued.id,
                        attempt = queued.attempt,
                        error = %err,
                        "copy job failed, retrying"
                    );
                    record_job(JobOutcome::Retried, elapsed);
                    self.queue.retry(queued, policy.backoff).await
                } else {
                    tracing::error!(
                        job_id = %queued.id,
                        attempt = queued.attempt,
                        from = %queued.job.dataset_from,
                        to = %queued.job.dataset_to,
                        error = %err,
                        "copy job failed"
                    );
                    record_job(JobOutcome::Aborted, elapsed);
                    self.queue.fail(queued, &err).await
                }
            }
        }
    }
}

/// Keeps the first worker error. Later ones are only logged.
fn settle_worker(
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
    failure: &mut Option<Error>,
) {
    let outcome = joined.map_err(|err| Error::internal(format!("copy worker panicked: {err}")));
    if let Err(err) | Ok(Err(err)) = outcome {
        tracing::error!(error = %err, "copy worker failed to settle its job");
        failure.get_or_insert(err);
    }
}
