//! # seistore-journal
//!
//! The storage-agnostic metadata journal.
//!
//! A [`Journal`] persists keyed JSON entities and answers filtered queries.
//! Three backends implement it, each as a query compiler plus a client trait
//! for the store it targets:
//!
//! - **scan**: per-kind tables scanned with AND-chained filter expressions
//! - **document-sql**: one relational table of JSON documents
//! - **sql-api**: a document container queried with parameterized SQL
//!
//! On top of the journal sit the [`Transaction`] coordinator, which queues
//! writes until commit, and the [`DatasetStore`], which maps dataset records
//! onto entities.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use seistore_journal::prelude::*;
//! use seistore_journal::backends::{DocumentSqlJournal, MemoryDocumentSqlClient};
//!
//! # tokio_test::block_on(async {
//! let journal = Arc::new(DocumentSqlJournal::new(Arc::new(MemoryDocumentSqlClient::new())));
//! let key = journal.create_key(&KeySpec::new("seismic-store", Kind::Tenants, "acme")).unwrap();
//! journal.save(&Entity::new(key.clone(), Default::default())).await.unwrap();
//! assert!(journal.get(&key).await.unwrap().is_some());
//! # });
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod backends;
pub mod datasets;
pub mod entity;
pub mod journal;
pub mod key;
pub mod query;
pub mod registry;
pub mod transaction;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::datasets::{DatasetStore, ListMode, Pagination, StoredDataset};
    pub use crate::entity::Entity;
    pub use crate::journal::Journal;
    pub use crate::key::{DatasetKeyStrategy, Key, KeySpec, Kind};
    pub use crate::query::{Cursor, Filter, Operator, Query, QueryPage};
    pub use crate::registry::JournalRegistry;
    pub use crate::transaction::{Transaction, TransactionState};
}

pub use datasets::DatasetStore;
pub use entity::Entity;
pub use journal::Journal;
pub use key::{Key, KeySpec, Kind};
pub use query::{Operator, Query, QueryPage};
pub use registry::{JournalRegistry, in_memory_registry};
pub use transaction::{Transaction, TransactionState};
