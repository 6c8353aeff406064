//! Acceptance of copy requests.
//!
//! Submitting a copy registers the destination as an `InProgress`
//! placeholder under a fresh write lock and enqueues a [`CopyJob`]. The write
//! lock id doubles as the placeholder's `sbit`, which is how the worker
//! releases it. If anything fails after the write lock is taken, the lock,
//! the optional source read lock and the placeholder are rolled back.
//! Enqueueing is the last step, so a queued job is never orphaned.

use std::sync::Arc;

use chrono::Utc;

use seistore_core::dataset::{Dataset, TransferStatus};
use seistore_core::error::{Error, Result};
use seistore_core::id::JobId;
use seistore_core::tenant::{DatasetRef, Tenant};
use seistore_journal::datasets::{DatasetStore, StoredDataset};
use seistore_journal::key::DatasetKeyStrategy;
use seistore_locker::{LockGrant, LockMode, LockValue};

use crate::context::CopyContext;
use crate::job::{CopyJob, SubprojectSettings};
use crate::metrics::{record_request, register_metrics};
use crate::queue::JobQueue;

/// A request to copy one dataset onto a new one in the same tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// Owning tenant of both datasets.
    pub tenant: Tenant,
    /// Dataset to copy.
    pub from: DatasetRef,
    /// Dataset to create.
    pub to: DatasetRef,
    /// Storage resource (`bucket/prefix`) assigned to the destination.
    pub destination_storage: String,
    /// Destination subproject settings.
    pub subproject: SubprojectSettings,
    /// Hold a read lock on the source until the copy finishes.
    pub lock_source: bool,
    /// Requesting user.
    pub usermail: String,
}

/// How a copy request was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySubmission {
    /// A new copy job was queued.
    Accepted {
        /// Queued job.
        job_id: JobId,
        /// Write lock held on the destination until the job finishes.
        write_lock_id: String,
        /// Read lock held on the source, if requested.
        read_lock_id: Option<String>,
    },
    /// A previous request is still copying onto the destination.
    AlreadyInProgress,
    /// A previous copy onto the destination already finished.
    Finished(TransferStatus),
}

/// Accepts copy requests and feeds the job queue.
pub struct CopyRequests {
    context: Arc<CopyContext>,
    queue: Arc<dyn JobQueue>,
}

impl std::fmt::Debug for CopyRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyRequests")
            .field("provider", &self.context.provider())
            .field("queue", &self.queue.name())
            .finish()
    }
}

struct Held {
    write: LockGrant,
    read: Option<LockGrant>,
    placeholder: Option<StoredDataset>,
}

impl CopyRequests {
    /// Creates the acceptor.
    #[must_use]
    pub fn new(context: Arc<CopyContext>, queue: Arc<dyn JobQueue>) -> Self {
        register_metrics();
        Self { context, queue }
    }

    /// Accepts `request`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the source is not registered
    /// - [`Error::Locked`] if the destination or the source is write locked
    /// - [`Error::AlreadyExists`] if the destination is a regular dataset
    /// - [`Error::InvalidInput`] if a dataset has no storage resource
    /// - any journal, locker or queue error, after rollback
    pub async fn submit(&self, request: &CopyRequest) -> Result<CopySubmission> {
        let result = self.accept(request).await;
        record_request(match &result {
            Ok(CopySubmission::Accepted { .. }) => "accepted",
            Ok(CopySubmission::AlreadyInProgress) => "in_progress",
            Ok(CopySubmission::Finished(_)) => "finished",
            Err(_) => "rejected",
        });
        result
    }

    async fn accept(&self, request: &CopyRequest) -> Result<CopySubmission> {
        let store = self.context.datasets(&request.tenant)?;
        let locker = self.context.locker();
        let enforce_key = request.subproject.enforce_key;

        let source = store
            .find(&request.from, enforce_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("the dataset {} does not exist", request.from)))?;

        let to_path = request.to.lock_key();
        let destination_lock = locker.get_lock(&to_path).await?;
        let existing = store.find(&request.to, enforce_key).await?;

        if destination_lock.as_ref().is_some_and(LockValue::is_write) {
            let in_progress = existing
                .as_ref()
                .is_some_and(|d| d.dataset.transfer_status == Some(TransferStatus::InProgress));
            if in_progress {
                return Ok(CopySubmission::AlreadyInProgress);
            }
            return Err(Error::Locked {
                message: format!("the dataset {} is write locked and cannot be copied", request.to),
            });
        }
        if let Some(existing) = existing {
            return match existing.dataset.transfer_status {
                Some(status) => Ok(CopySubmission::Finished(status)),
                None => Err(Error::AlreadyExists(format!("the dataset {} already exists", request.to))),
            };
        }

        let write = locker.lock(&to_path, LockMode::Write).await?;
        let mut held = Held {
            write,
            read: None,
            placeholder: None,
        };
        match self.enqueue(request, &store, &source, &mut held).await {
            Ok(job_id) => {
                tracing::info!(from = %request.from, to = %request.to, %job_id, "copy accepted");
                Ok(CopySubmission::Accepted {
                    job_id,
                    write_lock_id: held.write.id,
                    read_lock_id: held.read.map(|grant| grant.id),
                })
            }
            Err(err) => {
                self.roll_back(request, &store, held).await;
                Err(err)
            }
        }
    }

    async fn enqueue(
        &self,
        request: &CopyRequest,
        store: &DatasetStore,
        source: &StoredDataset,
        held: &mut Held,
    ) -> Result<JobId> {
        let locker = self.context.locker();
        let from_path = request.from.lock_key();

        if locker.get_lock(&from_path).await?.as_ref().is_some_and(LockValue::is_write) {
            return Err(Error::Locked {
                message: format!("the dataset {} is write locked and cannot be copied", request.from),
            });
        }
        if request.lock_source {
            held.read = Some(locker.lock(&from_path, LockMode::Read).await?);
        }

        let mut placeholder = source.dataset.clone();
        placeholder.tenant.clone_from(&request.to.tenant);
        placeholder.subproject.clone_from(&request.to.subproject);
        placeholder.path.clone_from(&request.to.path);
        placeholder.name.clone_from(&request.to.name);
        placeholder.gcsurl = Some(request.destination_storage.clone());
        placeholder.last_modified_date = Some(Utc::now().to_rfc2822());
        placeholder.sbit = Some(held.write.id.clone());
        placeholder.sbit_count = 1;
        placeholder.seismicmeta_guid = None;
        placeholder.transfer_status = Some(TransferStatus::InProgress);

        let (source_bucket, prefix_from) = storage_of(&source.dataset)?;
        let (destination_bucket, prefix_to) = storage_of(&placeholder)?;
        let job = CopyJob {
            tenant: request.tenant.clone(),
            dataset_from: request.from.clone(),
            dataset_to: request.to.clone(),
            source_bucket,
            destination_bucket,
            prefix_from,
            prefix_to,
            usermail: request.usermail.clone(),
            readlock_id: held.read.as_ref().map(|grant| grant.id.clone()),
            sbit: held.write.id.clone(),
            subproject: Some(request.subproject),
        };

        let strategy = if request.subproject.enforce_key {
            DatasetKeyStrategy::Enforced
        } else {
            DatasetKeyStrategy::RandomId
        };
        let key = store.create_key(&request.to, strategy)?;
        held.placeholder = Some(store.register(key, placeholder).await?);

        self.queue.enqueue(job).await
    }

    /// Best-effort undo of everything `enqueue` acquired.
    async fn roll_back(&self, request: &CopyRequest, store: &DatasetStore, held: Held) {
        let locker = self.context.locker();
        if let Some(placeholder) = &held.placeholder {
            if let Err(err) = store.delete(&placeholder.key).await {
                tracing::warn!(to = %request.to, error = %err, "failed to delete copy placeholder");
            }
        }
        if let Some(read) = &held.read {
            if let Err(err) = locker.unlock(&request.from.lock_key(), &read.id).await {
                tracing::warn!(from = %request.from, error = %err, "failed to release source read lock");
            }
        }
        if let Err(err) = locker.unlock(&request.to.lock_key(), &held.write.id).await {
            tracing::warn!(to = %request.to, error = %err, "failed to release destination write lock");
        }
    }
}

fn storage_of(dataset: &Dataset) -> Result<(String, String)> {
    dataset
        .storage_location()
        .map(|(bucket, prefix)| (bucket.to_string(), prefix.to_string()))
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "the dataset {} has no storage resource",
                dataset.dataset_ref()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryJobQueue;
    use crate::testing::{PROVIDER, copy_context, copy_request, dataset};
    use seistore_test_utils::{DatasetFactory, TestContext};

    struct Fixture {
        ctx: TestContext,
        queue: Arc<InMemoryJobQueue>,
        requests: CopyRequests,
    }

    async fn fixture() -> Fixture {
        let ctx = TestContext::new(PROVIDER);
        ctx.seed(DatasetFactory::at(&ctx.tenant, "/raw/", "a.segy")).await;
        let queue = Arc::new(InMemoryJobQueue::new("copy"));
        let requests = CopyRequests::new(copy_context(&ctx), queue.clone());
        Fixture { ctx, queue, requests }
    }

    #[tokio::test]
    async fn accepted_copy_registers_a_locked_placeholder() {
        let f = fixture().await;
        let request = copy_request(&f.ctx, "a.segy", "b.segy");

        let CopySubmission::Accepted {
            write_lock_id,
            read_lock_id,
            ..
        } = f.requests.submit(&request).await.expect("submit")
        else {
            panic!("expected the copy to be accepted");
        };
        let read_lock_id = read_lock_id.expect("source read lock");

        let placeholder = f.ctx.dataset(&request.to).await.expect("placeholder");
        assert_eq!(placeholder.dataset.transfer_status, Some(TransferStatus::InProgress));
        assert_eq!(placeholder.dataset.sbit.as_deref(), Some(write_lock_id.as_str()));
        assert_eq!(placeholder.dataset.gcsurl.as_deref(), Some(request.destination_storage.as_str()));
        assert_eq!(placeholder.dataset.gtags, ["segy"]);

        let locker = &f.ctx.locker;
        assert_eq!(
            locker.get_lock(&request.to.lock_key()).await.expect("lock"),
            Some(LockValue::Write(write_lock_id.clone()))
        );
        assert_eq!(
            locker.get_lock(&request.from.lock_key()).await.expect("lock"),
            Some(LockValue::Read(vec![read_lock_id.clone()]))
        );

        let queued = f.queue.dequeue().await.expect("dequeue").expect("job");
        assert_eq!(queued.job.sbit, write_lock_id);
        assert_eq!(queued.job.readlock_id, Some(read_lock_id));
        assert_eq!(queued.job.prefix_from, "a.segy");
        assert_eq!(queued.job.prefix_to, "b.segy");
    }

    #[tokio::test]
    async fn source_lock_is_optional() {
        let f = fixture().await;
        let mut request = copy_request(&f.ctx, "a.segy", "b.segy");
        request.lock_source = false;

        let submission = f.requests.submit(&request).await.expect("submit");
        assert!(matches!(submission, CopySubmission::Accepted { read_lock_id: None, .. }));
        assert_eq!(
            f.ctx.locker.get_lock(&request.from.lock_key()).await.expect("lock"),
            None
        );
    }

    #[tokio::test]
    async fn resubmitting_a_running_copy_reports_progress() {
        let f = fixture().await;
        let request = copy_request(&f.ctx, "a.segy", "b.segy");
        f.requests.submit(&request).await.expect("first");

        let again = f.requests.submit(&request).await.expect("second");
        assert_eq!(again, CopySubmission::AlreadyInProgress);
        assert_eq!(f.queue.depth().expect("depth"), 1);
    }

    #[tokio::test]
    async fn finished_destinations_report_their_outcome() {
        let f = fixture().await;
        let mut done = DatasetFactory::at(&f.ctx.tenant, "/raw/", "b.segy");
        done.transfer_status = Some(TransferStatus::Aborted);
        f.ctx.seed(done).await;

        let submission = f
            .requests
            .submit(&copy_request(&f.ctx, "a.segy", "b.segy"))
            .await
            .expect("submit");
        assert_eq!(submission, CopySubmission::Finished(TransferStatus::Aborted));
    }

    #[tokio::test]
    async fn regular_destinations_and_missing_sources_are_rejected() {
        let f = fixture().await;
        f.ctx.seed(DatasetFactory::at(&f.ctx.tenant, "/raw/", "b.segy")).await;

        let exists = f.requests.submit(&copy_request(&f.ctx, "a.segy", "b.segy")).await;
        assert!(matches!(exists, Err(Error::AlreadyExists(_))));

        let missing = f.requests.submit(&copy_request(&f.ctx, "nope.segy", "c.segy")).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
        assert_eq!(f.queue.depth().expect("depth"), 0);
    }

    #[tokio::test]
    async fn write_locked_source_is_rolled_back() {
        let f = fixture().await;
        let request = copy_request(&f.ctx, "a.segy", "b.segy");
        f.ctx
            .locker
            .lock(&request.from.lock_key(), LockMode::Write)
            .await
            .expect("lock source");

        let result = f.requests.submit(&request).await;
        assert!(matches!(result, Err(Error::Locked { .. })));
        assert_eq!(
            f.ctx.locker.get_lock(&request.to.lock_key()).await.expect("lock"),
            None
        );
        assert!(f.ctx.dataset(&request.to).await.is_none());
    }

    #[tokio::test]
    async fn write_locked_destination_without_copy_is_locked() {
        let f = fixture().await;
        let request = copy_request(&f.ctx, "a.segy", "b.segy");
        f.ctx
            .locker
            .lock(&dataset(&f.ctx, "b.segy").lock_key(), LockMode::Write)
            .await
            .expect("lock destination");

        let result = f.requests.submit(&request).await;
        assert!(matches!(result, Err(Error::Locked { .. })));
    }

    #[tokio::test]
    async fn queue_failure_releases_everything() {
        let f = fixture().await;
        f.queue.close().await.expect("close");
        let request = copy_request(&f.ctx, "a.segy", "b.segy");

        let result = f.requests.submit(&request).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        for path in [request.to.lock_key(), request.from.lock_key()] {
            assert_eq!(f.ctx.locker.get_lock(&path).await.expect("lock"), None, "{path}");
        }
        assert!(f.ctx.dataset(&request.to).await.is_none());
    }
}
