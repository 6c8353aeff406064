//! In-memory row store.
//!
//! Paging follows the row store's cursor semantics: the page starts at the
//! cursor row (ids at or above it, in id order), `skip` rows are dropped
//! from the front, and at most `take` rows are returned.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use seistore_core::error::{Error, Result};

use super::client::{DocumentSqlClient, Row};
use super::compiler::FindManyArgs;

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<i64, Row>,
    unique: HashMap<(String, String), i64>,
    next_id: i64,
}

/// In-memory [`DocumentSqlClient`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentSqlClient {
    table: Arc<RwLock<Table>>,
}

impl MemoryDocumentSqlClient {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.table.read().map_err(poison_err)?.rows.len())
    }

    /// Returns true when no rows are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl DocumentSqlClient for MemoryDocumentSqlClient {
    async fn upsert(
        &self,
        name: &str,
        key: &str,
        ctag: Option<&str>,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let mut guard = self.table.write().map_err(poison_err)?;
        let table = &mut *guard;
        let unique = (name.to_string(), key.to_string());
        let id = match table.unique.get(&unique) {
            Some(id) => *id,
            None => {
                table.next_id += 1;
                let id = table.next_id;
                table.unique.insert(unique, id);
                id
            }
        };
        table.rows.insert(
            id,
            Row {
                id,
                name: name.to_string(),
                key: key.to_string(),
                ctag: ctag.map(str::to_string),
                data: data.clone(),
            },
        );
        Ok(())
    }

    async fn find_unique(&self, name: &str, key: &str) -> Result<Option<Row>> {
        let table = self.table.read().map_err(poison_err)?;
        Ok(table
            .unique
            .get(&(name.to_string(), key.to_string()))
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn delete(&self, name: &str, key: &str) -> Result<bool> {
        let mut table = self.table.write().map_err(poison_err)?;
        match table.unique.remove(&(name.to_string(), key.to_string())) {
            Some(id) => {
                table.rows.remove(&id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_many(&self, args: &FindManyArgs) -> Result<Vec<Row>> {
        let table = self.table.read().map_err(poison_err)?;
        let start = args.cursor.unwrap_or(i64::MIN);
        Ok(table
            .rows
            .range(start..)
            .map(|(_, row)| row)
            .filter(|row| row.key == args.partition_key)
            .filter(|row| args.predicates.iter().all(|p| p.matches(&row.data)))
            .skip(args.skip.unwrap_or(0))
            .take(args.take.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[allow(clippy::needless_pass_by_value)]
fn poison_err<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::internal("row store lock poisoned")
}
