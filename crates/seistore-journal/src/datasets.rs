//! Dataset metadata access over any [`Journal`].
//!
//! [`DatasetStore`] is the one place that knows how dataset records map onto
//! journal entities: which namespace they live in, how their keys are
//! derived, and how listings are expressed as queries.

use std::sync::Arc;

use futures::{TryStreamExt, stream};
use serde_json::Value;

use seistore_core::dataset::Dataset;
use seistore_core::error::Result;
use seistore_core::tenant::{DatasetRef, StoreNamespace};

use crate::entity::Entity;
use crate::journal::Journal;
use crate::key::{DatasetKeyStrategy, Key, KeySpec, Kind};

const MAX_IN_FLIGHT_DELETES: usize = 16;

/// A dataset record together with its journal key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDataset {
    /// Journal key.
    pub key: Key,
    /// Record.
    pub dataset: Dataset,
}

/// Cursor-based pagination request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Cursor returned by the previous page.
    pub cursor: Option<String>,
}

/// One page of dataset records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetPage {
    /// Records in the page.
    pub datasets: Vec<StoredDataset>,
    /// Cursor of the next page. Only set for paginated requests.
    pub next_cursor: Option<String>,
}

/// What a folder listing returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListMode {
    /// Datasets and sub-folders.
    #[default]
    All,
    /// Datasets only.
    Datasets,
    /// Sub-folders only.
    Directories,
}

/// Content of one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderContent {
    /// Dataset names directly in the folder.
    pub datasets: Vec<String>,
    /// Sub-folder names, each with a trailing `/`.
    pub directories: Vec<String>,
}

/// Dataset metadata operations.
#[derive(Clone)]
pub struct DatasetStore {
    journal: Arc<dyn Journal>,
    namespace: StoreNamespace,
}

impl std::fmt::Debug for DatasetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetStore")
            .field("backend", &self.journal.backend())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl DatasetStore {
    /// Creates a store over `journal`.
    #[must_use]
    pub fn new(journal: Arc<dyn Journal>, namespace: StoreNamespace) -> Self {
        Self { journal, namespace }
    }

    /// The underlying journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    /// Journal namespace of a subproject.
    #[must_use]
    pub fn subproject_namespace(&self, tenant: &str, subproject: &str) -> String {
        self.namespace.subproject(tenant, subproject)
    }

    /// Builds the key of a new dataset record.
    ///
    /// # Errors
    ///
    /// Returns the journal's key error.
    pub fn create_key(&self, dataset: &DatasetRef, strategy: DatasetKeyStrategy) -> Result<Key> {
        let namespace = self.subproject_namespace(&dataset.tenant, &dataset.subproject);
        self.journal
            .create_key(&KeySpec::dataset(namespace, strategy).at(&dataset.path, &dataset.name))
    }

    /// Persists a new record under `key` with a fresh change tag.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn register(&self, key: Key, mut dataset: Dataset) -> Result<StoredDataset> {
        dataset.touch();
        let stored = StoredDataset { key, dataset };
        self.journal.save(&to_entity(&stored)?).await?;
        Ok(stored)
    }

    /// Reads a record by its enforced key.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn get_by_key(&self, dataset: &DatasetRef) -> Result<Option<StoredDataset>> {
        let key = self.create_key(dataset, DatasetKeyStrategy::Enforced)?;
        match self.journal.get(&key).await? {
            Some(entity) => Ok(Some(from_entity(entity, dataset)?)),
            None => Ok(None),
        }
    }

    /// Reads a record by querying its name and path.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn get(&self, dataset: &DatasetRef) -> Result<Option<StoredDataset>> {
        let query = self
            .journal
            .create_query(
                &self.subproject_namespace(&dataset.tenant, &dataset.subproject),
                Kind::Datasets,
            )
            .filter("name", dataset.name.as_str())
            .filter("path", dataset.path.as_str());
        let page = self.journal.run_query(&query).await?;
        match page.entities.into_iter().next() {
            Some(entity) => Ok(Some(from_entity(entity, dataset)?)),
            None => Ok(None),
        }
    }

    /// Reads a record, by enforced key when `enforce_key` is set and by query
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn find(&self, dataset: &DatasetRef, enforce_key: bool) -> Result<Option<StoredDataset>> {
        if enforce_key {
            self.get_by_key(dataset).await
        } else {
            self.get(dataset).await
        }
    }

    /// Rewrites a record with a fresh change tag.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn update(&self, stored: &mut StoredDataset) -> Result<()> {
        stored.dataset.touch();
        self.journal.save(&to_entity(stored)?).await
    }

    /// Rewrites several records, each with a fresh change tag.
    ///
    /// # Errors
    ///
    /// Stops at the first journal error.
    pub async fn update_all(&self, stored: &mut [StoredDataset]) -> Result<()> {
        let mut entities = Vec::with_capacity(stored.len());
        for record in stored.iter_mut() {
            record.dataset.touch();
            entities.push(to_entity(record)?);
        }
        self.journal.save_all(&entities).await
    }

    /// Lists the datasets of a subproject, optionally restricted to records
    /// carrying every tag in `gtags`.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn list(
        &self,
        tenant: &str,
        subproject: &str,
        gtags: &[String],
        pagination: Option<&Pagination>,
    ) -> Result<DatasetPage> {
        let mut query = self
            .journal
            .create_query(&self.subproject_namespace(tenant, subproject), Kind::Datasets);
        for tag in gtags {
            query = query.filter_op("gtags", self.journal.contains_operator(), tag.as_str());
        }
        if let Some(pagination) = pagination {
            if let Some(cursor) = &pagination.cursor {
                query = query.start(cursor.as_str());
            }
            if let Some(limit) = pagination.limit {
                query = query.limit(limit);
            }
        }

        let page = self.journal.run_query(&query).await?;
        let owner = DatasetRef::new(tenant, subproject, "/", "");
        let datasets = page
            .entities
            .into_iter()
            .map(|entity| from_entity(entity, &owner))
            .collect::<Result<Vec<_>>>()?;
        Ok(DatasetPage {
            datasets,
            next_cursor: pagination.and(page.end_cursor),
        })
    }

    /// Lists the dataset names and sub-folders of the folder `dataset.path`.
    /// `dataset.name` is ignored.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn list_content(&self, dataset: &DatasetRef, mode: ListMode) -> Result<FolderContent> {
        let namespace = self.subproject_namespace(&dataset.tenant, &dataset.subproject);
        let mut content = FolderContent::default();

        if mode != ListMode::Directories {
            let query = self
                .journal
                .create_query(&namespace, Kind::Datasets)
                .filter("path", dataset.path.as_str());
            let page = self.journal.run_query(&query).await?;
            content.datasets = page
                .entities
                .iter()
                .filter_map(|entity| match entity.data.get("name") {
                    Some(Value::String(name)) => Some(name.clone()),
                    _ => None,
                })
                .collect();
        }
        if mode != ListMode::Datasets {
            content.directories = self.journal.list_folders(&namespace, &dataset.path).await?;
        }
        Ok(content)
    }

    /// Removes one record. Removing a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns the journal error.
    pub async fn delete(&self, key: &Key) -> Result<()> {
        self.journal.delete(key).await
    }

    /// Removes every dataset record of a subproject.
    ///
    /// # Errors
    ///
    /// Returns the first journal error; other deletions may have completed.
    pub async fn delete_all(&self, tenant: &str, subproject: &str) -> Result<usize> {
        let query = self
            .journal
            .create_query(&self.subproject_namespace(tenant, subproject), Kind::Datasets);
        let page = self.journal.run_query(&query).await?;
        let count = page.entities.len();

        let journal = Arc::clone(&self.journal);
        stream::iter(page.entities.into_iter().map(Ok))
            .try_for_each_concurrent(MAX_IN_FLIGHT_DELETES, move |entity| {
                let journal = Arc::clone(&journal);
                async move { journal.delete(&entity.key).await }
            })
            .await?;

        tracing::info!(tenant, subproject, count, "deleted subproject datasets");
        Ok(count)
    }
}

fn to_entity(stored: &StoredDataset) -> Result<Entity> {
    Ok(Entity::from_model(stored.key.clone(), &stored.dataset)?.with_ctag(stored.dataset.ctag.clone()))
}

fn from_entity(entity: Entity, owner: &DatasetRef) -> Result<StoredDataset> {
    let mut dataset: Dataset = entity.to_model()?;
    dataset.fill_defaults(&owner.tenant, &owner.subproject);
    Ok(StoredDataset {
        key: entity.key,
        dataset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DocumentSqlJournal, MemoryDocumentSqlClient};
    use seistore_core::dataset::LEGACY_CTAG;

    fn store() -> DatasetStore {
        let journal = Arc::new(DocumentSqlJournal::new(Arc::new(MemoryDocumentSqlClient::new())));
        DatasetStore::new(journal, StoreNamespace::default())
    }

    async fn register(store: &DatasetStore, path: &str, name: &str, gtags: &[&str]) -> StoredDataset {
        let address = DatasetRef::new("acme", "survey", path, name);
        let mut dataset = Dataset::new(&address);
        dataset.gtags = gtags.iter().map(|t| (*t).to_string()).collect();
        let key = store
            .create_key(&address, DatasetKeyStrategy::Enforced)
            .expect("key");
        store.register(key, dataset).await.expect("register")
    }

    #[tokio::test]
    async fn register_then_read_by_key_and_by_query() {
        let store = store();
        let stored = register(&store, "/a/", "x.segy", &[]).await;
        assert_eq!(stored.dataset.ctag.len(), 16);

        let address = DatasetRef::new("acme", "survey", "/a/", "x.segy");
        let by_key = store.get_by_key(&address).await.expect("get").expect("present");
        let by_query = store.get(&address).await.expect("get").expect("present");
        assert_eq!(by_key.dataset, stored.dataset);
        assert_eq!(by_query.key, stored.key);

        let missing = DatasetRef::new("acme", "survey", "/a/", "y.segy");
        assert!(store.find(&missing, true).await.expect("find").is_none());
        assert!(store.find(&missing, false).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn update_regenerates_the_ctag() {
        let store = store();
        let mut stored = register(&store, "/a/", "x.segy", &[]).await;
        let before = stored.dataset.ctag.clone();
        stored.dataset.ltag = Some("legal".into());
        store.update(&mut stored).await.expect("update");
        assert_ne!(stored.dataset.ctag, before);

        let read = store
            .get_by_key(&stored.dataset.dataset_ref())
            .await
            .expect("get")
            .expect("present");
        assert_eq!(read.dataset.ltag.as_deref(), Some("legal"));
    }

    #[tokio::test]
    async fn list_filters_on_every_tag_and_pages() {
        let store = store();
        register(&store, "/a/", "one", &["x", "y"]).await;
        register(&store, "/a/", "two", &["x"]).await;
        register(&store, "/b/", "three", &["y"]).await;

        let tagged = store
            .list("acme", "survey", &["x".into(), "y".into()], None)
            .await
            .expect("list");
        assert_eq!(tagged.datasets.len(), 1);
        assert_eq!(tagged.datasets[0].dataset.name, "one");
        assert_eq!(tagged.next_cursor, None);

        let pagination = Pagination {
            limit: Some(2),
            cursor: None,
        };
        let first = store.list("acme", "survey", &[], Some(&pagination)).await.expect("list");
        assert_eq!(first.datasets.len(), 2);
        assert!(first.next_cursor.is_some());
    }

    #[tokio::test]
    async fn folder_content_lists_datasets_and_directories() {
        let store = store();
        register(&store, "/a/", "one", &[]).await;
        register(&store, "/a/b/", "two", &[]).await;
        register(&store, "/a/b/c/", "three", &[]).await;

        let folder = DatasetRef::new("acme", "survey", "/a/", "");
        let all = store.list_content(&folder, ListMode::All).await.expect("ls");
        assert_eq!(all.datasets, ["one"]);
        assert_eq!(all.directories, ["b/"]);

        let dirs = store.list_content(&folder, ListMode::Directories).await.expect("ls");
        assert!(dirs.datasets.is_empty());
    }

    #[tokio::test]
    async fn delete_all_clears_the_subproject() {
        let store = store();
        for i in 0..5 {
            register(&store, "/a/", &format!("d{i}"), &[]).await;
        }
        assert_eq!(store.delete_all("acme", "survey").await.expect("delete"), 5);
        let page = store.list("acme", "survey", &[], None).await.expect("list");
        assert!(page.datasets.is_empty());
    }

    #[test]
    fn legacy_records_get_defaults() {
        let key = Key::new("k", "ns-datasets", Kind::Datasets);
        let data = serde_json::json!({"name": "x", "path": "/a/"});
        let entity = Entity::new(key, data.as_object().cloned().expect("object"));
        let owner = DatasetRef::new("acme", "survey", "/a/", "x");
        let stored = from_entity(entity, &owner).expect("model");
        assert_eq!(stored.dataset.tenant, "acme");
        assert_eq!(stored.dataset.ctag, LEGACY_CTAG);
    }
}
