//! Container client abstraction for the SQL-API document backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use seistore_core::error::Result;

use super::compiler::{FeedOptions, SqlQuerySpec};

/// Stored document: `{id, key, ctag?, data}`, partitioned on `/key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosmosItem {
    /// Entity name.
    pub id: String,
    /// `{namespace}-{kind}` partition key.
    pub key: String,
    /// Change tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctag: Option<String>,
    /// Entity payload.
    pub data: Map<String, Value>,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedResponse {
    /// Whole documents, or projected objects for `SELECT a.data.f` queries.
    pub resources: Vec<Value>,
    /// Token for the next page, when one exists.
    pub continuation_token: Option<String>,
}

/// Operations the SQL-API journal needs from a container.
#[async_trait]
pub trait DocumentContainer: Send + Sync + 'static {
    /// Container identifier, used in logs.
    fn id(&self) -> &str;

    /// Inserts or replaces a document by `(id, key)`.
    async fn upsert_item(&self, item: CosmosItem) -> Result<()>;

    /// Reads a document.
    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<CosmosItem>>;

    /// Removes a document. Returns whether it existed.
    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<bool>;

    /// Runs one page of a query.
    async fn query_items(&self, spec: &SqlQuerySpec, options: &FeedOptions) -> Result<FeedResponse>;
}

/// Container id for a data partition: `seistore-{partition}-container`.
#[must_use]
pub fn container_id(data_partition: &str) -> String {
    format!("seistore-{data_partition}-container")
}
