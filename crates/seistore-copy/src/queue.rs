//! Durable job queue protocol.
//!
//! - [`JobQueue`]: what the worker pool needs from a queue
//! - [`RetryPolicy`]: whole-job retry settings, fixed when the queue is set up
//! - [`InMemoryJobQueue`]: process-local queue for tests and local runs
//!
//! A dequeued job is in flight until it is acked, retried or failed. A
//! closed queue accepts no new jobs and reports exhaustion only once nothing
//! is pending or in flight, so retries of running jobs are never lost.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use seistore_core::config::SeistoreConfig;
use seistore_core::error::{Error, Result};
use seistore_core::id::JobId;

use crate::job::CopyJob;

/// Whole-job retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per job, the first included.
    pub max_attempts: u32,
    /// Delay before a retried job becomes visible again.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SeistoreConfig::default())
    }
}

impl RetryPolicy {
    /// Reads the copy retry settings of `config`.
    #[must_use]
    pub fn from_config(config: &SeistoreConfig) -> Self {
        Self {
            max_attempts: config.copy_max_attempts,
            backoff: config.copy_retry_backoff,
        }
    }

    /// Never retries.
    #[must_use]
    pub const fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Whether a job that just failed its `attempt`-th try may run again.
    #[must_use]
    pub const fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    /// Queue-assigned id.
    pub id: JobId,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Payload.
    pub job: CopyJob,
}

/// A job that ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    /// The job as of its last attempt.
    pub job: QueuedJob,
    /// Rendered error of the last attempt.
    pub error: String,
}

/// Queue operations used by copy requests and the worker pool.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Queue name, used in logs.
    fn name(&self) -> &str;

    /// Retry settings applied to failed jobs.
    fn retry_policy(&self) -> RetryPolicy;

    /// Adds a job.
    async fn enqueue(&self, job: CopyJob) -> Result<JobId>;

    /// Waits for the next job. Returns `None` once the queue is closed and
    /// drained.
    async fn dequeue(&self) -> Result<Option<QueuedJob>>;

    /// Marks an in-flight job as done.
    async fn ack(&self, id: JobId) -> Result<()>;

    /// Puts an in-flight job back for another attempt after `delay`.
    async fn retry(&self, job: QueuedJob, delay: Duration) -> Result<()>;

    /// Marks an in-flight job as terminally failed.
    async fn fail(&self, job: QueuedJob, error: &Error) -> Result<()>;

    /// Stops accepting jobs.
    async fn close(&self) -> Result<()>;
}

#[derive(Debug)]
struct Pending {
    job: QueuedJob,
    ready_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Pending>,
    in_flight: usize,
    closed: bool,
    completed: VecDeque<JobId>,
    failed: VecDeque<FailedJob>,
}

/// Outcomes kept by default for [`InMemoryJobQueue::completed`] and
/// [`InMemoryJobQueue::failed`].
pub const DEFAULT_OUTCOME_HISTORY: usize = 1024;

/// In-memory [`JobQueue`].
///
/// Not durable: jobs live only as long as the process. Only the most recent
/// outcomes are remembered.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    policy: RetryPolicy,
    history: usize,
    state: RwLock<QueueState>,
    changed: Notify,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("job queue lock poisoned")
}

impl InMemoryJobQueue {
    /// Creates an open, empty queue with the default retry policy.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: RetryPolicy::default(),
            history: DEFAULT_OUTCOME_HISTORY,
            state: RwLock::new(QueueState::default()),
            changed: Notify::new(),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets how many completed and how many failed jobs are remembered.
    #[must_use]
    pub fn with_outcome_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    /// Jobs waiting to run, retries included.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn depth(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.pending.len())
    }

    /// Ids of the most recently acked jobs, in completion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn completed(&self) -> Result<Vec<JobId>> {
        Ok(self.state.read().map_err(poison_err)?.completed.iter().copied().collect())
    }

    /// The most recent terminally failed jobs, in failure order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn failed(&self) -> Result<Vec<FailedJob>> {
        Ok(self.state.read().map_err(poison_err)?.failed.iter().cloned().collect())
    }

    fn settle(&self, update: impl FnOnce(&mut QueueState)) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.in_flight = state.in_flight.saturating_sub(1);
        update(&mut state);
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn enqueue(&self, job: CopyJob) -> Result<JobId> {
        let id = JobId::generate();
        let mut state = self.state.write().map_err(poison_err)?;
        if state.closed {
            return Err(Error::InvalidInput(format!("job queue {} is closed", self.name)));
        }
        state.pending.push_back(Pending {
            job: QueuedJob { id, attempt: 1, job },
            ready_at: Instant::now(),
        });
        drop(state);
        self.changed.notify_waiters();
        tracing::debug!(queue = %self.name, job_id = %id, "copy job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>> {
        loop {
            // Registered before inspecting the state so no wakeup is missed.
            let changed = self.changed.notified();
            let next_ready = {
                let mut state = self.state.write().map_err(poison_err)?;
                let now = Instant::now();
                if let Some(pos) = state.pending.iter().position(|p| p.ready_at <= now) {
                    if let Some(pending) = state.pending.remove(pos) {
                        state.in_flight += 1;
                        return Ok(Some(pending.job));
                    }
                }
                if state.closed && state.pending.is_empty() && state.in_flight == 0 {
                    return Ok(None);
                }
                state.pending.iter().map(|p| p.ready_at).min()
            };
            match next_ready {
                Some(at) => {
                    tokio::select! {
                        () = changed => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => changed.await,
            }
        }
    }

    async fn ack(&self, id: JobId) -> Result<()> {
        let history = self.history;
        self.settle(|state| remember(&mut state.completed, id, history))
    }

    async fn retry(&self, mut job: QueuedJob, delay: Duration) -> Result<()> {
        job.attempt += 1;
        tracing::debug!(queue = %self.name, job_id = %job.id, attempt = job.attempt, ?delay, "copy job requeued");
        self.settle(|state| {
            state.pending.push_back(Pending {
                job,
                ready_at: Instant::now() + delay,
            });
        })
    }

    async fn fail(&self, job: QueuedJob, error: &Error) -> Result<()> {
        let error = error.to_string();
        let history = self.history;
        self.settle(|state| remember(&mut state.failed, FailedJob { job, error }, history))
    }

    async fn close(&self) -> Result<()> {
        self.state.write().map_err(poison_err)?.closed = true;
        self.changed.notify_waiters();
        Ok(())
    }
}

fn remember<T>(outcomes: &mut VecDeque<T>, outcome: T, history: usize) {
    outcomes.push_back(outcome);
    while outcomes.len() > history {
        outcomes.pop_front();
    }
}
