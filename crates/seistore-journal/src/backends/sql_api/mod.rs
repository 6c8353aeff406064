//! SQL-API document journal: one container per data partition, documents
//! partitioned by `{namespace}-{kind}`.
//!
//! Each `run_query` call fetches exactly one page; `end_cursor` is the
//! container's continuation token.

pub mod client;
pub mod compiler;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;

use seistore_core::error::{Error, Result};
use seistore_core::observability::journal_span;

use crate::entity::Entity;
use crate::journal::Journal;
use crate::key::{Key, KeySpec, local_name, namespaced_partition_key};
use crate::query::{Query, QueryPage};
use crate::transaction::Transaction;

pub use client::{CosmosItem, DocumentContainer, FeedResponse, container_id};
pub use compiler::{BACKEND, FeedOptions, SqlParameter, SqlQuerySpec};
pub use memory::MemoryDocumentContainer;

/// Journal over a [`DocumentContainer`].
pub struct SqlApiJournal<C> {
    container: Arc<C>,
}

impl<C: DocumentContainer> std::fmt::Debug for SqlApiJournal<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlApiJournal")
            .field("container", &self.container.id())
            .finish()
    }
}

impl<C: DocumentContainer> SqlApiJournal<C> {
    /// Creates a journal over `container`.
    #[must_use]
    pub fn new(container: Arc<C>) -> Self {
        Self { container }
    }

    /// The underlying container.
    #[must_use]
    pub fn container(&self) -> &Arc<C> {
        &self.container
    }
}

#[async_trait]
impl<C: DocumentContainer> Journal for SqlApiJournal<C> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn create_key(&self, spec: &KeySpec) -> Result<Key> {
        Ok(Key::new(
            local_name(spec)?,
            namespaced_partition_key(&spec.namespace, spec.kind),
            spec.kind,
        ))
    }

    async fn save(&self, entity: &Entity) -> Result<()> {
        let item = CosmosItem {
            id: entity.key.name.clone(),
            key: entity.key.partition_key.clone(),
            ctag: entity.ctag.clone(),
            data: entity.data.clone(),
        };
        self.container
            .upsert_item(item)
            .instrument(journal_span("save", BACKEND, &entity.key.partition_key))
            .await
    }

    async fn get(&self, key: &Key) -> Result<Option<Entity>> {
        let item = self
            .container
            .read_item(&key.name, &key.partition_key)
            .instrument(journal_span("get", BACKEND, &key.partition_key))
            .await?;
        Ok(item.map(|item| Entity {
            key: key.clone(),
            ctag: item.ctag,
            data: item.data,
        }))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let existed = self
            .container
            .delete_item(&key.name, &key.partition_key)
            .instrument(journal_span("delete", BACKEND, &key.partition_key))
            .await?;
        if !existed {
            tracing::debug!(key = %key, "delete of missing entity ignored");
        }
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> Result<QueryPage> {
        let (spec, options) = compiler::compile(query)?;
        let response = self
            .container
            .query_items(&spec, &options)
            .instrument(journal_span("run_query", BACKEND, &query.namespace))
            .await?;

        let mut page = QueryPage {
            end_cursor: response.continuation_token,
            ..QueryPage::default()
        };
        for resource in response.resources {
            if query.is_projection() {
                match resource {
                    Value::Object(row) => page.projections.push(row),
                    other => {
                        return Err(Error::serialization(format!(
                            "projected row is not an object: {other}"
                        )));
                    }
                }
            } else {
                let item: CosmosItem = serde_json::from_value(resource)?;
                page.entities.push(Entity {
                    key: Key::new(item.id, item.key, query.kind),
                    ctag: item.ctag,
                    data: item.data,
                });
            }
        }
        Ok(page)
    }

    fn transaction(self: Arc<Self>) -> Transaction {
        Transaction::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{DatasetKeyStrategy, Kind};
    use crate::query::Operator;
    use serde_json::json;

    const NS: &str = "seismic-store-acme-survey";

    fn journal() -> Arc<SqlApiJournal<MemoryDocumentContainer>> {
        Arc::new(SqlApiJournal::new(Arc::new(MemoryDocumentContainer::new("acme"))))
    }

    async fn save(j: &SqlApiJournal<MemoryDocumentContainer>, data: Value) -> Key {
        let key = j
            .create_key(&KeySpec::dataset(NS, DatasetKeyStrategy::RandomId))
            .expect("key");
        let entity = Entity::new(key.clone(), data.as_object().cloned().expect("object"));
        j.save(&entity).await.expect("save");
        key
    }

    #[tokio::test]
    async fn stored_documents_keep_the_envelope_outside_data() {
        let j = journal();
        let key = save(&j, json!({"name": "x", "path": "/a/"})).await;
        let mut entity = j.get(&key).await.expect("get").expect("present");
        assert_eq!(entity.data, *json!({"name": "x", "path": "/a/"}).as_object().expect("object"));

        entity = entity.with_ctag("c9");
        j.save(&entity).await.expect("save");
        let item = j
            .container()
            .read_item(&key.name, &key.partition_key)
            .await
            .expect("read")
            .expect("present");
        assert_eq!(item.ctag.as_deref(), Some("c9"));
        assert!(!item.data.contains_key("ctag"));
    }

    #[tokio::test]
    async fn double_filter_on_one_property_applies_both() {
        let j = journal();
        for size in [1, 5, 9, 12] {
            save(&j, json!({"size": size})).await;
        }
        let page = j
            .run_query(
                &Query::new(NS, Kind::Datasets)
                    .filter_op("size", Operator::Gt, 2)
                    .filter_op("size", Operator::Lt, 10),
            )
            .await
            .expect("query");
        let mut sizes: Vec<_> = page.entities.iter().map(|e| e.data["size"].clone()).collect();
        sizes.sort_by_key(|v| v.as_i64());
        assert_eq!(sizes, [json!(5), json!(9)]);
    }

    #[tokio::test]
    async fn continuation_token_is_the_end_cursor() {
        let j = journal();
        for i in 0..3 {
            save(&j, json!({"i": i})).await;
        }
        let first = j
            .run_query(&Query::new(NS, Kind::Datasets).limit(2))
            .await
            .expect("query");
        let cursor = first.end_cursor.expect("cursor");
        let second = j
            .run_query(&Query::new(NS, Kind::Datasets).limit(2).start(cursor))
            .await
            .expect("query");
        assert_eq!(second.entities.len(), 1);
        assert_eq!(second.end_cursor, None);
    }

    #[tokio::test]
    async fn folders_come_from_grouped_paths() {
        let j = journal();
        for path in ["/a/", "/a/b/", "/a/b/", "/a/c/d/"] {
            save(&j, json!({"path": path})).await;
        }
        let mut folders = j.list_folders(NS, "/a/").await.expect("folders");
        folders.sort();
        assert_eq!(folders, ["b/", "c/"]);
    }
}
