//! The storage-agnostic journal contract.
//!
//! One implementation exists per backend; all of them behave identically for
//! the operations below and differ only in how keys and queries are encoded.
//!
//! Deleting a key that does not exist is a no-op on every backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use seistore_core::error::Result;

use crate::entity::Entity;
use crate::key::{Key, KeySpec, Kind};
use crate::query::{Operator, Query, QueryPage};
use crate::transaction::Transaction;

/// Upper bound used for folder range scans: sorts after any path below the
/// folder.
pub const PATH_RANGE_SENTINEL: char = '\u{fffd}';

/// CRUD, query and transaction access to one metadata store.
#[async_trait]
pub trait Journal: Send + Sync + 'static {
    /// Short backend identifier used in logs.
    fn backend(&self) -> &'static str;

    /// Builds the key of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`seistore_core::Error::InvalidName`] if the name violates the
    /// backend's naming rules, or [`seistore_core::Error::InvalidInput`] if
    /// the spec lacks a required segment.
    fn create_key(&self, spec: &KeySpec) -> Result<Key>;

    /// Upserts an entity by `(name, partition_key)`.
    ///
    /// # Errors
    ///
    /// Returns [`seistore_core::Error::InvalidName`] before any I/O if the
    /// key violates the backend's naming rules, or the backend error.
    async fn save(&self, entity: &Entity) -> Result<()>;

    /// Upserts several entities, in order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure; earlier entities stay saved.
    async fn save_all(&self, entities: &[Entity]) -> Result<()> {
        for entity in entities {
            self.save(entity).await?;
        }
        Ok(())
    }

    /// Reads an entity. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn get(&self, key: &Key) -> Result<Option<Entity>>;

    /// Removes an entity. Removing a missing entity succeeds.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn delete(&self, key: &Key) -> Result<()>;

    /// Starts a query over one kind in one namespace.
    fn create_query(&self, namespace: &str, kind: Kind) -> Query {
        Query::new(namespace, kind)
    }

    /// Runs a query.
    ///
    /// # Errors
    ///
    /// Returns [`seistore_core::Error::UnsupportedOperator`] before any I/O
    /// for constructs the backend cannot express, or the backend error.
    async fn run_query(&self, query: &Query) -> Result<QueryPage>;

    /// Operator to use for membership filters on array properties.
    fn contains_operator(&self) -> Operator {
        Operator::Contains
    }

    /// Returns a new transaction over this journal.
    fn transaction(self: Arc<Self>) -> Transaction;

    /// Lists the direct sub-folders of `path` (a `/`-delimited folder) that
    /// contain datasets, as names with a trailing `/`, in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    async fn list_folders(&self, namespace: &str, path: &str) -> Result<Vec<String>> {
        let query = self
            .create_query(namespace, Kind::Datasets)
            .select(["path"])
            .group_by(["path"])
            .filter_op("path", Operator::Gt, path)
            .filter_op("path", Operator::Lt, format!("{path}{PATH_RANGE_SENTINEL}"));

        let page = self.run_query(&query).await?;
        let mut folders: Vec<String> = Vec::new();
        for row in &page.projections {
            let Some(Value::String(child)) = row.get("path") else {
                continue;
            };
            let Some(relative) = child.strip_prefix(path) else {
                continue;
            };
            let folder = match relative.find('/') {
                Some(idx) => &relative[..=idx],
                None => relative,
            };
            if !folder.is_empty() && !folders.iter().any(|f| f == folder) {
                folders.push(folder.to_string());
            }
        }
        Ok(folders)
    }
}
