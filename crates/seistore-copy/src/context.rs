//! Collaborators shared by copy requests and copy workers.

use std::sync::Arc;

use seistore_core::config::SeistoreConfig;
use seistore_core::error::Result;
use seistore_core::storage::{ObjectStorage, StorageRegistry};
use seistore_core::tenant::{StoreNamespace, Tenant};
use seistore_journal::datasets::DatasetStore;
use seistore_journal::registry::{JournalRegistry, journal_for};
use seistore_locker::Locker;

/// Resolves per-tenant journals and storage for one provider and holds the
/// shared locker.
#[derive(Debug)]
pub struct CopyContext {
    provider: String,
    namespace: StoreNamespace,
    journals: Arc<JournalRegistry>,
    storages: Arc<StorageRegistry>,
    locker: Arc<Locker>,
}

impl CopyContext {
    /// Creates a context for `provider`.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        namespace: StoreNamespace,
        journals: Arc<JournalRegistry>,
        storages: Arc<StorageRegistry>,
        locker: Arc<Locker>,
    ) -> Self {
        Self {
            provider: provider.into(),
            namespace,
            journals,
            storages,
            locker,
        }
    }

    /// Creates a context for the configured provider and environment.
    #[must_use]
    pub fn from_config(
        config: &SeistoreConfig,
        journals: Arc<JournalRegistry>,
        storages: Arc<StorageRegistry>,
        locker: Arc<Locker>,
    ) -> Self {
        Self::new(
            config.cloud_provider.clone(),
            config.namespace(),
            journals,
            storages,
            locker,
        )
    }

    /// Provider id.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The shared locker.
    #[must_use]
    pub fn locker(&self) -> &Locker {
        &self.locker
    }

    /// Dataset metadata of `tenant`.
    ///
    /// # Errors
    ///
    /// Returns the registry error for an unknown provider.
    pub fn datasets(&self, tenant: &Tenant) -> Result<DatasetStore> {
        let journal = journal_for(&self.journals, &self.provider, tenant)?;
        Ok(DatasetStore::new(journal, self.namespace.clone()))
    }

    /// Object storage of `tenant`.
    ///
    /// # Errors
    ///
    /// Returns the registry error for an unknown provider.
    pub fn storage(&self, tenant: &Tenant) -> Result<Arc<dyn ObjectStorage>> {
        self.storages.build(&self.provider, tenant)
    }
}
