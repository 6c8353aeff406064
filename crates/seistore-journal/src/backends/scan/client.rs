//! Wire-level client abstraction for the scan+filter store.

use async_trait::async_trait;
use serde_json::{Map, Value};

use seistore_core::error::Result;

use crate::key::Key;

use super::compiler::ScanInput;

/// One stored item.
///
/// `id` is the table's primary key. The entity key and change tag are kept
/// beside the payload so `attributes` round-trips unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanItem {
    /// Primary key.
    pub id: String,
    /// Entity key as saved.
    pub key: Key,
    /// Change tag.
    pub ctag: Option<String>,
    /// Entity payload.
    pub attributes: Map<String, Value>,
    /// Attributes added by the journal for shared-table filtering. Filters
    /// read these before `attributes`.
    pub partition_attributes: Map<String, Value>,
}

impl ScanItem {
    /// Looks up an attribute for filter evaluation.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.partition_attributes
            .get(name)
            .or_else(|| self.attributes.get(name))
    }
}

/// One page of a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutput {
    /// Items that passed the filter, projected when a projection was given.
    pub items: Vec<ScanItem>,
    /// Primary key of the last evaluated item, present when the table has
    /// more items to evaluate.
    pub last_evaluated_key: Option<Map<String, Value>>,
}

/// Operations the scan journal needs from the store.
#[async_trait]
pub trait WideColumnClient: Send + Sync + 'static {
    /// Writes an item, replacing any item with the same id.
    async fn put_item(&self, table: &str, item: ScanItem) -> Result<()>;

    /// Reads an item by id.
    async fn get_item(&self, table: &str, id: &str) -> Result<Option<ScanItem>>;

    /// Removes an item by id. Missing items are ignored.
    async fn delete_item(&self, table: &str, id: &str) -> Result<()>;

    /// Evaluates up to `input.limit` items and returns those passing the
    /// filter.
    async fn scan(&self, input: &ScanInput) -> Result<ScanOutput>;
}
