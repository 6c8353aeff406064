//! Document-over-SQL journal: a single relational table of JSON documents,
//! partitioned by a `{namespace}-{kind}` key column.

pub mod client;
pub mod compiler;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use seistore_core::error::Result;
use seistore_core::observability::journal_span;

use crate::entity::Entity;
use crate::journal::Journal;
use crate::key::{Key, KeySpec, local_name, namespaced_partition_key};
use crate::query::{Query, QueryPage, distinct_by, project};
use crate::transaction::Transaction;

pub use client::{DocumentSqlClient, Row};
pub use compiler::{BACKEND, FindManyArgs, PathOperator, PathPredicate};
pub use memory::MemoryDocumentSqlClient;

/// Journal over a [`DocumentSqlClient`].
pub struct DocumentSqlJournal<C> {
    client: Arc<C>,
}

impl<C> std::fmt::Debug for DocumentSqlJournal<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSqlJournal").finish_non_exhaustive()
    }
}

impl<C: DocumentSqlClient> DocumentSqlJournal<C> {
    /// Creates a journal over `client`.
    #[must_use]
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

#[async_trait]
impl<C: DocumentSqlClient> Journal for DocumentSqlJournal<C> {
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
        self.client
            .upsert(
                &entity.key.name,
                &entity.key.partition_key,
                entity.ctag.as_deref(),
                &entity.data,
            )
            .instrument(journal_span("save", BACKEND, &entity.key.partition_key))
            .await
    }

    async fn get(&self, key: &Key) -> Result<Option<Entity>> {
        let row = self
            .client
            .find_unique(&key.name, &key.partition_key)
            .instrument(journal_span("get", BACKEND, &key.partition_key))
            .await?;
        Ok(row.map(|row| Entity {
            key: key.clone(),
            ctag: row.ctag,
            data: row.data,
        }))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let existed = self
            .client
            .delete(&key.name, &key.partition_key)
            .instrument(journal_span("delete", BACKEND, &key.partition_key))
            .await?;
        if !existed {
            tracing::debug!(key = %key, "delete of missing entity ignored");
        }
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> Result<QueryPage> {
        let args = compiler::compile(query)?;
        let rows = self
            .client
            .find_many(&args)
            .instrument(journal_span("run_query", BACKEND, &query.namespace))
            .await?;

        let end_cursor = match (query.limit, rows.last()) {
            (Some(limit), Some(last)) if rows.len() >= limit => Some(last.id.to_string()),
            _ => None,
        };

        let mut page = QueryPage {
            end_cursor,
            ..QueryPage::default()
        };
        if query.is_projection() {
            let mut fields = query.projection.clone();
            for field in &query.group_by {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
            let projected: Vec<_> = rows.iter().map(|row| project(&row.data, &fields)).collect();
            page.projections = if query.group_by.is_empty() {
                projected
            } else {
                distinct_by(projected, &query.group_by)
            };
        } else {
            page.entities = rows
                .into_iter()
                .map(|row| Entity {
                    key: Key::new(row.name, row.key, query.kind),
                    ctag: row.ctag,
                    data: row.data,
                })
                .collect();
        }
        Ok(page)
    }

    fn transaction(self: Arc<Self>) -> Transaction {
        Transaction::new(self)
    }
}
