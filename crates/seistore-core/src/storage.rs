//! Object storage collaborator.
//!
//! The copy pipeline never touches object bytes itself: it delegates the bulk
//! transfer of every object under a dataset prefix to an [`ObjectStorage`]
//! implementation supplied by the cloud provider layer.
//!
//! [`MemoryObjectStorage`] is a process-local implementation for tests and
//! local development.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::tenant::Tenant;

/// Bulk object operations required by the metadata core.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Copies every object under `prefix_from` in `source_bucket` to the same
    /// relative name under `prefix_to` in `destination_bucket`.
    ///
    /// `owner_email` identifies the user on whose behalf the copy runs.
    ///
    /// # Errors
    ///
    /// Returns the provider error if any object fails to copy. Objects copied
    /// before the failure are left in place.
    async fn copy(
        &self,
        source_bucket: &str,
        prefix_from: &str,
        destination_bucket: &str,
        prefix_to: &str,
        owner_email: &str,
    ) -> Result<()>;
}

/// Builds a tenant's object storage for a provider id.
pub type StorageRegistry = Registry<dyn ObjectStorage, Tenant>;

/// In-memory object storage keyed by `(bucket, object name)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStorage {
    buckets: Arc<RwLock<BTreeMap<String, BTreeMap<String, Bytes>>>>,
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::internal("object storage lock poisoned")
}

impl MemoryObjectStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one object.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn put_object(&self, bucket: &str, name: &str, data: impl Into<Bytes>) -> Result<()> {
        self.buckets
            .write()
            .map_err(poisoned)?
            .entry(bucket.to_string())
            .or_default()
            .insert(name.to_string(), data.into());
        Ok(())
    }

    /// Reads one object.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn get_object(&self, bucket: &str, name: &str) -> Result<Option<Bytes>> {
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets.get(bucket).and_then(|b| b.get(name)).cloned())
    }

    /// Lists object names under `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets
            .get(bucket)
            .map(|b| {
                b.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn copy(
        &self,
        source_bucket: &str,
        prefix_from: &str,
        destination_bucket: &str,
        prefix_to: &str,
        _owner_email: &str,
    ) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        let copied: Vec<(String, Bytes)> = buckets
            .get(source_bucket)
            .map(|b| {
                b.range(prefix_from.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix_from))
                    .map(|(k, v)| (format!("{prefix_to}{}", &k[prefix_from.len()..]), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let target = buckets.entry(destination_bucket.to_string()).or_default();
        for (name, data) in copied {
            target.insert(name, data);
        }
        drop(buckets);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_moves_every_object_under_prefix() {
        let storage = MemoryObjectStorage::new();
        storage.put_object("src", "a/1", "one").expect("put");
        storage.put_object("src", "a/2", "two").expect("put");
        storage.put_object("src", "b/1", "other").expect("put");

        storage
            .copy("src", "a/", "dst", "z/", "user@example.com")
            .await
            .expect("copy");

        assert_eq!(storage.list_objects("dst", "").expect("list"), vec!["z/1", "z/2"]);
        assert_eq!(
            storage.get_object("dst", "z/2").expect("get"),
            Some(Bytes::from("two"))
        );
    }
}
