//! Test fixtures and factories.

use std::sync::Arc;

use seistore_core::dataset::Dataset;
use seistore_core::storage::{ObjectStorage, StorageRegistry};
use seistore_core::tenant::{DatasetRef, StoreNamespace, Tenant};
use seistore_journal::datasets::{DatasetStore, StoredDataset};
use seistore_journal::key::DatasetKeyStrategy;
use seistore_journal::registry::{JournalRegistry, in_memory_registry, journal_for};
use seistore_locker::{Locker, MemoryLockStore};

use crate::storage::TracingObjectStorage;

/// Tenant used by default in fixtures.
pub const TEST_TENANT: &str = "acme";
/// Subproject used by default in fixtures.
pub const TEST_SUBPROJECT: &str = "survey";
/// Bucket holding fixture datasets.
pub const TEST_BUCKET: &str = "acme-survey-bucket";

/// Pre-configured test environment for one provider: in-memory journals,
/// tracing object storage and a locker over a memory lock store.
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Provider id the registries are queried with.
    pub provider: String,
    /// Tenant owning every fixture dataset.
    pub tenant: Tenant,
    /// Journal namespaces.
    pub namespace: StoreNamespace,
    /// Journal registry.
    pub journals: Arc<JournalRegistry>,
    /// Storage registry, serving [`TestContext::storage`] for every provider.
    pub storages: Arc<StorageRegistry>,
    /// Object storage shared by all tenants.
    pub storage: TracingObjectStorage,
    /// Lock store behind [`TestContext::locker`].
    pub lock_store: Arc<MemoryLockStore>,
    /// Locker.
    pub locker: Arc<Locker>,
}

impl TestContext {
    /// Creates a context whose registries resolve `provider`.
    #[must_use]
    pub fn new(provider: &str) -> Self {
        Self::with_storage(provider, TracingObjectStorage::new())
    }

    /// Creates a context around existing object storage.
    #[must_use]
    pub fn with_storage(provider: &str, storage: TracingObjectStorage) -> Self {
        let mut storages = StorageRegistry::new("object storage");
        let shared = storage.clone();
        storages.register(provider, move |_: &Tenant| {
            Ok(Arc::new(shared.clone()) as Arc<dyn ObjectStorage>)
        });
        let lock_store = Arc::new(MemoryLockStore::new());

        Self {
            provider: provider.to_string(),
            tenant: Tenant::new(TEST_TENANT, "acme.example.com", "acme-project"),
            namespace: StoreNamespace::new(Some("test")),
            journals: Arc::new(in_memory_registry("test")),
            storages: Arc::new(storages),
            storage,
            locker: Arc::new(Locker::new(lock_store.clone())),
            lock_store,
        }
    }

    /// Dataset store of the fixture tenant.
    #[must_use]
    pub fn datasets(&self) -> DatasetStore {
        let journal =
            journal_for(&self.journals, &self.provider, &self.tenant).expect("journal for provider");
        DatasetStore::new(journal, self.namespace.clone())
    }

    /// Registers `dataset` under a random-id key and writes one object under
    /// its storage prefix.
    pub async fn seed(&self, dataset: Dataset) -> StoredDataset {
        if let Some((bucket, prefix)) = dataset.storage_location() {
            self.storage
                .objects()
                .put_object(bucket, &format!("{prefix}/0"), "trace-0")
                .expect("seed object");
        }
        let store = self.datasets();
        let key = store
            .create_key(&dataset.dataset_ref(), DatasetKeyStrategy::RandomId)
            .expect("dataset key");
        store.register(key, dataset).await.expect("register dataset")
    }

    /// Reads a dataset back.
    pub async fn dataset(&self, dataset: &DatasetRef) -> Option<StoredDataset> {
        self.datasets().get(dataset).await.expect("read dataset")
    }
}

/// Factory for dataset records.
pub struct DatasetFactory;

impl DatasetFactory {
    /// Address of a dataset in the fixture subproject.
    #[must_use]
    pub fn dataset_ref(tenant: &Tenant, path: &str, name: &str) -> DatasetRef {
        DatasetRef::new(tenant.name.as_str(), TEST_SUBPROJECT, path, name)
    }

    /// A dataset stored under `TEST_BUCKET/{name}`.
    #[must_use]
    pub fn at(tenant: &Tenant, path: &str, name: &str) -> Dataset {
        let mut dataset = Dataset::new(&Self::dataset_ref(tenant, path, name));
        dataset.gcsurl = Some(format!("{TEST_BUCKET}/{name}"));
        dataset.created_by = Some("user@example.com".to_string());
        dataset.gtags = vec!["segy".to_string()];
        dataset
    }
}
