//! Row-store client abstraction for the document-over-SQL backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use seistore_core::error::Result;

use super::compiler::FindManyArgs;

/// One row of the entity table. `(name, key)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Auto-increment row id, used as the paging cursor.
    pub id: i64,
    /// Local entity name.
    pub name: String,
    /// `{namespace}-{kind}` partition key.
    pub key: String,
    /// Change tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctag: Option<String>,
    /// JSON payload.
    pub data: Map<String, Value>,
}

/// Operations the document-over-SQL journal needs from the row store.
#[async_trait]
pub trait DocumentSqlClient: Send + Sync + 'static {
    /// Inserts a row, or replaces `ctag` and `data` of the row with the same
    /// `(name, key)`. Updated rows keep their id.
    async fn upsert(
        &self,
        name: &str,
        key: &str,
        ctag: Option<&str>,
        data: &Map<String, Value>,
    ) -> Result<()>;

    /// Reads the row with `(name, key)`.
    async fn find_unique(&self, name: &str, key: &str) -> Result<Option<Row>>;

    /// Removes the row with `(name, key)`. Returns whether a row existed.
    async fn delete(&self, name: &str, key: &str) -> Result<bool>;

    /// Returns matching rows ordered by id.
    async fn find_many(&self, args: &FindManyArgs) -> Result<Vec<Row>>;
}
