//! Execution of one copy job attempt.
//!
//! # Flow
//!
//! 1. Take the destination mutex (bounded attempts).
//! 2. Fetch the destination record. It must already exist as a placeholder.
//! 3. Delegate the object copy to [`ObjectStorage::copy`].
//! 4. Mark the destination `Completed`, release the mutex, then release the
//!    source read lock and the destination write lock.
//!
//! Any failure after the mutex is taken force-clears both lock paths,
//! releases the mutex and, when the record was fetched, marks it `Aborted`.
//! The attempt then fails with [`Error::JobAborted`] wrapping the cause.
//!
//! [`ObjectStorage::copy`]: seistore_core::storage::ObjectStorage::copy

use std::sync::Arc;

use tracing::Instrument;

use seistore_core::dataset::TransferStatus;
use seistore_core::error::{Error, Result};
use seistore_core::observability::copy_job_span;
use seistore_journal::datasets::{DatasetStore, StoredDataset};
use seistore_locker::MutexToken;

use crate::context::CopyContext;
use crate::queue::QueuedJob;

/// Runs copy job attempts.
#[derive(Debug, Clone)]
pub struct CopyProcessor {
    context: Arc<CopyContext>,
}

impl CopyProcessor {
    /// Creates a processor over `context`.
    #[must_use]
    pub fn new(context: Arc<CopyContext>) -> Self {
        Self { context }
    }

    /// Runs one attempt of `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobAborted`] carrying the failure. Resources have
    /// been released and the destination marked aborted where possible.
    pub async fn process(&self, queued: &QueuedJob) -> Result<()> {
        let job_id = queued.id.to_string();
        let span = copy_job_span(
            &job_id,
            queued.attempt,
            &queued.job.dataset_from.to_string(),
            &queued.job.dataset_to.to_string(),
        );
        self.attempt(queued)
            .instrument(span)
            .await
            .map_err(|source| Error::JobAborted {
                job_id,
                source: Box::new(source),
            })
    }

    async fn attempt(&self, queued: &QueuedJob) -> Result<()> {
        let job = &queued.job;
        let to_path = job.destination_path();
        let store = self.context.datasets(&job.tenant)?;
        let locker = self.context.locker();

        let token = match locker.acquire_mutex_with_retries(&to_path).await {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(resource = %to_path, error = %err, "unable to lock the destination for the copy");
                return Err(err);
            }
        };

        let mut fetched = None;
        match self.transfer(queued, &store, &token, &mut fetched).await {
            Ok(()) => {
                tracing::info!(to = %job.dataset_to, "copy completed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(from = %job.dataset_from, to = %job.dataset_to, error = %err, "copy failed");
                self.abort(queued, &store, &token, fetched).await;
                Err(err)
            }
        }
    }

    async fn transfer(
        &self,
        queued: &QueuedJob,
        store: &DatasetStore,
        token: &MutexToken,
        fetched: &mut Option<StoredDataset>,
    ) -> Result<()> {
        let job = &queued.job;
        let locker = self.context.locker();
        let to_path = job.destination_path();

        let found = store
            .find(&job.dataset_to, job.enforce_key())
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "dataset {} is not registered, aborting copy",
                    job.dataset_to
                ))
            })?;
        let destination = fetched.insert(found);

        tracing::info!(to = %job.dataset_to, "starting copy");
        let storage = self.context.storage(&job.tenant)?;
        storage
            .copy(
                &job.source_bucket,
                &job.prefix_from,
                &job.destination_bucket,
                &job.prefix_to,
                &job.usermail,
            )
            .await?;

        destination.dataset.transfer_status = Some(TransferStatus::Completed);
        store.update(destination).await?;

        locker.release_mutex(token, &to_path).await?;
        if let Some(read_lock) = &job.readlock_id {
            locker.unlock(&job.source_path(), read_lock).await?;
        }
        locker.unlock(&to_path, &job.sbit).await?;
        Ok(())
    }

    /// Best-effort cleanup. Failures are logged so the original error stays
    /// the one reported.
    async fn abort(
        &self,
        queued: &QueuedJob,
        store: &DatasetStore,
        token: &MutexToken,
        fetched: Option<StoredDataset>,
    ) {
        let job = &queued.job;
        let locker = self.context.locker();
        let to_path = job.destination_path();

        for path in [to_path.clone(), job.source_path()] {
            if let Err(err) = locker.del(&path).await {
                tracing::warn!(resource = %path, error = %err, "failed to clear locks");
            }
        }
        if let Err(err) = locker.release_mutex(token, &to_path).await {
            tracing::warn!(resource = %to_path, error = %err, "failed to release mutex");
        }
        if let Some(mut destination) = fetched {
            destination.dataset.transfer_status = Some(TransferStatus::Aborted);
            if let Err(err) = store.update(&mut destination).await {
                tracing::warn!(to = %job.dataset_to, error = %err, "failed to mark copy aborted");
            }
        }
    }
}

/// Whether a failed attempt must not be retried: the destination could not
/// be locked or is not registered.
#[must_use]
pub fn is_permanent_failure(err: &Error) -> bool {
    match err {
        Error::JobAborted { source, .. } => is_permanent_failure(source),
        Error::LockAcquisitionExhausted { .. } | Error::NotFound(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CopyJob;
    use crate::queue::{InMemoryJobQueue, JobQueue};
    use crate::request::CopyRequests;
    use crate::testing::{PROVIDER, copy_context, copy_request, dataset};
    use seistore_core::id::JobId;
    use seistore_core::tenant::DatasetRef;
    use seistore_locker::Locker;
    use seistore_test_utils::{DatasetFactory, TEST_BUCKET, TestContext};

    /// Submits a copy of `a.segy` onto `b.segy` and returns the queued job.
    async fn accepted(ctx: &TestContext) -> QueuedJob {
        ctx.seed(DatasetFactory::at(&ctx.tenant, "/raw/", "a.segy")).await;
        let queue = Arc::new(InMemoryJobQueue::new("copy"));
        CopyRequests::new(copy_context(ctx), queue.clone())
            .submit(&copy_request(ctx, "a.segy", "b.segy"))
            .await
            .expect("submit");
        queue.dequeue().await.expect("dequeue").expect("job")
    }

    async fn assert_unlocked(ctx: &TestContext, job: &CopyJob) {
        for path in [job.source_path(), job.destination_path()] {
            assert_eq!(ctx.locker.get_lock(&path).await.expect("lock"), None, "{path}");
        }
        let mutex = ctx
            .locker
            .acquire_mutex(&job.destination_path())
            .await
            .expect("mutex");
        assert!(mutex.is_some(), "mutex still held");
    }

    #[tokio::test]
    async fn completed_copy_releases_every_lock() {
        let ctx = TestContext::new(PROVIDER);
        let queued = accepted(&ctx).await;

        CopyProcessor::new(copy_context(&ctx))
            .process(&queued)
            .await
            .expect("copy");

        let destination = ctx.dataset(&queued.job.dataset_to).await.expect("destination");
        assert_eq!(destination.dataset.transfer_status, Some(TransferStatus::Completed));
        assert_eq!(
            ctx.storage.objects().list_objects(TEST_BUCKET, "b.segy").expect("list"),
            ["b.segy/0"]
        );
        let ops = ctx.storage.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].owner_email, "user@example.com");
        assert_unlocked(&ctx, &queued.job).await;
    }

    #[tokio::test]
    async fn failed_copy_is_aborted_and_cleaned_up() {
        let ctx = TestContext::new(PROVIDER);
        let queued = accepted(&ctx).await;
        ctx.storage.inject_failure("a.segy");

        let err = CopyProcessor::new(copy_context(&ctx))
            .process(&queued)
            .await
            .expect_err("copy fails");

        let Error::JobAborted { job_id, source } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(job_id, &queued.id.to_string());
        assert!(matches!(**source, Error::Backend { .. }));
        assert!(!is_permanent_failure(&err));

        let destination = ctx.dataset(&queued.job.dataset_to).await.expect("destination");
        assert_eq!(destination.dataset.transfer_status, Some(TransferStatus::Aborted));
        assert_unlocked(&ctx, &queued.job).await;
    }

    #[tokio::test]
    async fn unregistered_destination_fails_permanently() {
        let ctx = TestContext::new(PROVIDER);
        let queued = QueuedJob {
            id: JobId::generate(),
            attempt: 1,
            job: CopyJob {
                tenant: ctx.tenant.clone(),
                dataset_from: dataset(&ctx, "a.segy"),
                dataset_to: dataset(&ctx, "ghost.segy"),
                source_bucket: TEST_BUCKET.into(),
                destination_bucket: TEST_BUCKET.into(),
                prefix_from: "a.segy".into(),
                prefix_to: "ghost.segy".into(),
                usermail: "user@example.com".into(),
                readlock_id: None,
                sbit: "Wmissing".into(),
                subproject: None,
            },
        };

        let err = CopyProcessor::new(copy_context(&ctx))
            .process(&queued)
            .await
            .expect_err("no destination");
        assert!(is_permanent_failure(&err));
        assert!(ctx.storage.operations().is_empty());
        assert_unlocked(&ctx, &queued.job).await;
    }

    #[tokio::test]
    async fn held_mutex_exhausts_without_cleanup() {
        let ctx = TestContext::new(PROVIDER);
        let queued = accepted(&ctx).await;
        let locker = Arc::new(Locker::new(ctx.lock_store.clone()).with_max_attempts(2));
        let context = Arc::new(CopyContext::new(
            PROVIDER,
            ctx.namespace.clone(),
            Arc::clone(&ctx.journals),
            Arc::clone(&ctx.storages),
            locker,
        ));
        let _held = ctx
            .locker
            .acquire_mutex(&queued.job.destination_path())
            .await
            .expect("mutex")
            .expect("free");

        let err = CopyProcessor::new(context)
            .process(&queued)
            .await
            .expect_err("mutex held");
        assert!(is_permanent_failure(&err));
        assert!(ctx.storage.operations().is_empty());
        assert!(
            ctx.locker
                .get_lock(&queued.job.destination_path())
                .await
                .expect("lock")
                .is_some_and(|lock| lock.is_write())
        );
    }

    #[test]
    fn exhausted_locks_and_missing_destinations_are_permanent() {
        let exhausted = Error::JobAborted {
            job_id: "j".into(),
            source: Box::new(Error::LockAcquisitionExhausted {
                resource: DatasetRef::new("a", "b", "/", "c").lock_key(),
                attempts: 100,
            }),
        };
        assert!(is_permanent_failure(&exhausted));
        assert!(is_permanent_failure(&Error::NotFound("x".into())));
        assert!(!is_permanent_failure(&Error::backend_with_code("503", "unavailable")));
    }
}
