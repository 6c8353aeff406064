//! Journal backends.
//!
//! Each backend pairs a query compiler with a client trait describing the
//! store operations it needs, and ships an in-memory client implementing
//! that trait against the compiled native requests.

pub mod document_sql;
pub mod scan;
pub mod sql_api;

pub use document_sql::{DocumentSqlClient, DocumentSqlJournal, MemoryDocumentSqlClient};
pub use scan::{MemoryWideColumnClient, ScanJournal, ScanLayout, WideColumnClient};
pub use sql_api::{DocumentContainer, MemoryDocumentContainer, SqlApiJournal};
