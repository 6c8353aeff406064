//! Journal clients that record every store call.
//!
//! [`Recording`] wraps any backend client and logs the native request of each
//! call, so tests can assert what a journal sent to its store, or that it sent
//! nothing at all.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use seistore_core::error::Result;
use seistore_core::tenant::Tenant;
use seistore_journal::backends::document_sql::{FindManyArgs, Row};
use seistore_journal::backends::scan::{ScanInput, ScanItem, ScanOutput};
use seistore_journal::backends::sql_api::{CosmosItem, FeedOptions, FeedResponse, SqlQuerySpec};
use seistore_journal::backends::{
    DocumentContainer, DocumentSqlClient, DocumentSqlJournal, MemoryDocumentContainer,
    MemoryDocumentSqlClient, MemoryWideColumnClient, ScanJournal, ScanLayout, SqlApiJournal,
    WideColumnClient,
};
use seistore_journal::journal::Journal;

/// One store call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCall {
    /// Client method name.
    pub op: &'static str,
    /// Native request, as JSON.
    pub request: Value,
}

/// Shared log of store calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<ClientCall>>>,
}

impl CallLog {
    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().expect("lock").clone()
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    /// Whether no call was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests of the calls named `op`.
    #[must_use]
    pub fn requests(&self, op: &str) -> Vec<Value> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.request.clone())
            .collect()
    }

    /// Clears recorded calls.
    pub fn clear(&self) {
        self.calls.lock().expect("lock").clear();
    }

    fn record(&self, op: &'static str, request: Value) {
        self.calls.lock().expect("lock").push(ClientCall { op, request });
    }
}

/// Backend client wrapper recording every call into a [`CallLog`].
#[derive(Debug, Clone)]
pub struct Recording<C> {
    inner: Arc<C>,
    log: CallLog,
}

impl<C> Recording<C> {
    /// Wraps `inner`.
    pub fn new(inner: Arc<C>) -> Self {
        Self {
            inner,
            log: CallLog::default(),
        }
    }

    /// The call log.
    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// The wrapped client.
    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }
}

#[async_trait]
impl<C: WideColumnClient> WideColumnClient for Recording<C> {
    async fn put_item(&self, table: &str, item: ScanItem) -> Result<()> {
        self.log.record("put_item", json!({"table": table, "id": item.id}));
        self.inner.put_item(table, item).await
    }

    async fn get_item(&self, table: &str, id: &str) -> Result<Option<ScanItem>> {
        self.log.record("get_item", json!({"table": table, "id": id}));
        self.inner.get_item(table, id).await
    }

    async fn delete_item(&self, table: &str, id: &str) -> Result<()> {
        self.log.record("delete_item", json!({"table": table, "id": id}));
        self.inner.delete_item(table, id).await
    }

    async fn scan(&self, input: &ScanInput) -> Result<ScanOutput> {
        self.log
            .record("scan", serde_json::to_value(input).unwrap_or(Value::Null));
        self.inner.scan(input).await
    }
}

#[async_trait]
impl<C: DocumentSqlClient> DocumentSqlClient for Recording<C> {
    async fn upsert(
        &self,
        name: &str,
        key: &str,
        ctag: Option<&str>,
        data: &Map<String, Value>,
    ) -> Result<()> {
        self.log.record("upsert", json!({"name": name, "key": key}));
        self.inner.upsert(name, key, ctag, data).await
    }

    async fn find_unique(&self, name: &str, key: &str) -> Result<Option<Row>> {
        self.log.record("find_unique", json!({"name": name, "key": key}));
        self.inner.find_unique(name, key).await
    }

    async fn delete(&self, name: &str, key: &str) -> Result<bool> {
        self.log.record("delete", json!({"name": name, "key": key}));
        self.inner.delete(name, key).await
    }

    async fn find_many(&self, args: &FindManyArgs) -> Result<Vec<Row>> {
        self.log.record("find_many", args.to_json());
        self.inner.find_many(args).await
    }
}

#[async_trait]
impl<C: DocumentContainer> DocumentContainer for Recording<C> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn upsert_item(&self, item: CosmosItem) -> Result<()> {
        self.log.record("upsert_item", json!({"id": item.id, "key": item.key}));
        self.inner.upsert_item(item).await
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<CosmosItem>> {
        self.log
            .record("read_item", json!({"id": id, "partitionKey": partition_key}));
        self.inner.read_item(id, partition_key).await
    }

    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<bool> {
        self.log
            .record("delete_item", json!({"id": id, "partitionKey": partition_key}));
        self.inner.delete_item(id, partition_key).await
    }

    async fn query_items(&self, spec: &SqlQuerySpec, options: &FeedOptions) -> Result<FeedResponse> {
        self.log.record(
            "query_items",
            json!({
                "spec": serde_json::to_value(spec).unwrap_or(Value::Null),
                "options": serde_json::to_value(options).unwrap_or(Value::Null),
            }),
        );
        self.inner.query_items(spec, options).await
    }
}

/// One journal under test with the log of its store calls.
pub struct RecordedJournal {
    /// Backend identifier.
    pub backend: &'static str,
    /// The journal.
    pub journal: Arc<dyn Journal>,
    /// Calls the journal made to its store.
    pub log: CallLog,
}

impl std::fmt::Debug for RecordedJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedJournal")
            .field("backend", &self.backend)
            .field("calls", &self.log.len())
            .finish_non_exhaustive()
    }
}

/// Fresh in-memory journals of every backend for `tenant`, each recording
/// its store calls.
#[must_use]
pub fn recorded_journals(tenant: &Tenant) -> Vec<RecordedJournal> {
    let scan = Arc::new(Recording::new(Arc::new(MemoryWideColumnClient::new())));
    let document_sql = Arc::new(Recording::new(Arc::new(MemoryDocumentSqlClient::new())));
    let sql_api = Arc::new(Recording::new(Arc::new(MemoryDocumentContainer::new(
        tenant.data_partition(),
    ))));

    vec![
        RecordedJournal {
            backend: "scan",
            log: scan.log().clone(),
            journal: Arc::new(ScanJournal::new(
                scan,
                ScanLayout::new("test", tenant.data_partition()),
            )),
        },
        RecordedJournal {
            backend: "document-sql",
            log: document_sql.log().clone(),
            journal: Arc::new(DocumentSqlJournal::new(document_sql)),
        },
        RecordedJournal {
            backend: "sql-api",
            log: sql_api.log().clone(),
            journal: Arc::new(SqlApiJournal::new(sql_api)),
        },
    ]
}
