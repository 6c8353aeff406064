//! Queued-operation transactions over a [`Journal`].
//!
//! A transaction buffers `save` and `delete` calls and replays them on
//! `commit`, one at a time and in submission order. There is no atomicity
//! across operations: if `commit` fails partway, the operations before the
//! failure stay applied and the failed one plus the rest stay queued. The
//! transaction then refuses further work until [`Transaction::reset`] (or
//! [`Transaction::rollback`]) is called.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut tx = journal.clone().transaction();
//! tx.run()?;
//! tx.save(entity)?;
//! tx.delete(old_key)?;
//! tx.commit().await?;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use seistore_core::error::{Error, Result};

use crate::entity::Entity;
use crate::journal::Journal;
use crate::key::{Key, Kind};
use crate::query::{Query, QueryPage};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No unit of work in progress.
    Idle,
    /// Accepting operations.
    Open,
    /// Replaying operations, or stopped after a failed replay.
    Committing,
}

/// A queued operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Upsert an entity.
    Save(Entity),
    /// Remove an entity.
    Delete(Key),
}

/// A queued batch of writes against one journal.
pub struct Transaction {
    journal: Arc<dyn Journal>,
    state: TransactionState,
    queue: VecDeque<Operation>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("backend", &self.journal.backend())
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Transaction {
    /// Creates an idle transaction.
    #[must_use]
    pub fn new(journal: Arc<dyn Journal>) -> Self {
        Self {
            journal,
            state: TransactionState::Idle,
            queue: VecDeque::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Operations waiting for `commit`, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &Operation> {
        self.queue.iter()
    }

    /// Number of operations waiting for `commit`.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Opens the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionInUse`] if operations are still queued or
    /// a failed commit has not been reset.
    pub fn run(&mut self) -> Result<()> {
        if !self.queue.is_empty() || self.state == TransactionState::Committing {
            return Err(in_use());
        }
        self.state = TransactionState::Open;
        Ok(())
    }

    /// Queues an upsert. No I/O happens until `commit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionInUse`] after a failed commit.
    pub fn save(&mut self, entity: Entity) -> Result<()> {
        self.enqueue(Operation::Save(entity))
    }

    /// Queues several upserts, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionInUse`] after a failed commit.
    pub fn save_all(&mut self, entities: impl IntoIterator<Item = Entity>) -> Result<()> {
        for entity in entities {
            self.enqueue(Operation::Save(entity))?;
        }
        Ok(())
    }

    /// Queues a removal. No I/O happens until `commit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionInUse`] after a failed commit.
    pub fn delete(&mut self, key: Key) -> Result<()> {
        self.enqueue(Operation::Delete(key))
    }

    fn enqueue(&mut self, operation: Operation) -> Result<()> {
        match self.state {
            TransactionState::Committing => Err(in_use()),
            TransactionState::Idle | TransactionState::Open => {
                self.state = TransactionState::Open;
                self.queue.push_back(operation);
                Ok(())
            }
        }
    }

    /// Reads through to the journal. Queued operations are not visible.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn get(&self, key: &Key) -> Result<Option<Entity>> {
        self.journal.get(key).await
    }

    /// Starts a query on the underlying journal.
    #[must_use]
    pub fn create_query(&self, namespace: &str, kind: Kind) -> Query {
        self.journal.create_query(namespace, kind)
    }

    /// Queries through to the journal. Queued operations are not visible.
    ///
    /// # Errors
    ///
    /// Returns the journal's query error.
    pub async fn run_query(&self, query: &Query) -> Result<QueryPage> {
        self.journal.run_query(query).await
    }

    /// Applies queued operations in submission order, awaiting each before
    /// issuing the next, then returns to idle.
    ///
    /// # Errors
    ///
    /// Returns the first backend error unchanged. Operations applied before
    /// it stay applied; the failed operation and those after it stay queued
    /// and the transaction stays in [`TransactionState::Committing`] until
    /// reset.
    pub async fn commit(&mut self) -> Result<()> {
        if self.state == TransactionState::Committing {
            return Err(in_use());
        }
        self.state = TransactionState::Committing;

        let total = self.queue.len();
        let mut applied = 0usize;
        while let Some(operation) = self.queue.front() {
            let outcome = match operation {
                Operation::Save(entity) => self.journal.save(entity).await,
                Operation::Delete(key) => self.journal.delete(key).await,
            };
            if let Err(err) = outcome {
                tracing::warn!(
                    backend = self.journal.backend(),
                    applied,
                    remaining = total - applied,
                    error = %err,
                    "transaction commit partially applied"
                );
                return Err(err);
            }
            self.queue.pop_front();
            applied += 1;
        }

        tracing::debug!(backend = self.journal.backend(), applied, "transaction committed");
        self.state = TransactionState::Idle;
        Ok(())
    }

    /// Discards queued operations without contacting the backend.
    pub fn rollback(&mut self) {
        self.clear();
    }

    /// Clears a transaction left in [`TransactionState::Committing`] by a
    /// failed commit, discarding the operations that were not applied.
    pub fn reset(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.state = TransactionState::Idle;
    }
}

fn in_use() -> Error {
    Error::TransactionInUse {
        message: "Transaction is already in use.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::backends::{DocumentSqlJournal, MemoryDocumentSqlClient};
    use crate::key::KeySpec;

    /// Counts store calls and fails saves of entities named `fail`.
    struct Probe {
        inner: DocumentSqlJournal<MemoryDocumentSqlClient>,
        calls: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: DocumentSqlJournal::new(Arc::new(MemoryDocumentSqlClient::new())),
                calls: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn record(&self, op: &str, key: &Key) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().expect("order").push(format!("{op}:{}", key.name));
        }
    }

    #[async_trait]
    impl Journal for Probe {
        fn backend(&self) -> &'static str {
            "probe"
        }

        fn create_key(&self, spec: &KeySpec) -> Result<Key> {
            self.inner.create_key(spec)
        }

        async fn save(&self, entity: &Entity) -> Result<()> {
            self.record("save", &entity.key);
            if entity.key.name == "fail" {
                return Err(Error::backend("injected failure"));
            }
            self.inner.save(entity).await
        }

        async fn get(&self, key: &Key) -> Result<Option<Entity>> {
            self.record("get", key);
            self.inner.get(key).await
        }

        async fn delete(&self, key: &Key) -> Result<()> {
            self.record("delete", key);
            self.inner.delete(key).await
        }

        async fn run_query(&self, query: &Query) -> Result<QueryPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.run_query(query).await
        }

        fn transaction(self: Arc<Self>) -> Transaction {
            Transaction::new(self)
        }
    }

    fn entity(probe: &Probe, name: &str) -> Entity {
        let key = probe
            .create_key(&KeySpec::new("ns", Kind::Apps, name))
            .expect("key");
        Entity::new(key, json!({"name": name}).as_object().cloned().expect("object"))
    }

    #[tokio::test]
    async fn operations_are_deferred_until_commit() {
        let probe = Probe::new();
        let mut tx = Arc::clone(&probe).transaction();
        tx.run().expect("run");
        tx.save(entity(&probe, "a")).expect("save");
        tx.save(entity(&probe, "b")).expect("save");
        assert_eq!(probe.calls(), 0);
        assert_eq!(tx.state(), TransactionState::Open);

        tx.commit().await.expect("commit");
        assert_eq!(probe.calls(), 2);
        assert_eq!(tx.state(), TransactionState::Idle);
        assert_eq!(tx.queued_len(), 0);
    }

    #[tokio::test]
    async fn commit_replays_in_submission_order() {
        let probe = Probe::new();
        let a = entity(&probe, "a");
        let mut tx = Arc::clone(&probe).transaction();
        tx.run().expect("run");
        tx.save(a.clone()).expect("save");
        tx.delete(a.key.clone()).expect("delete");
        tx.save(entity(&probe, "b")).expect("save");
        tx.commit().await.expect("commit");

        assert_eq!(*probe.order.lock().expect("order"), ["save:a", "delete:a", "save:b"]);
        assert!(probe.get(&a.key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn rollback_discards_without_io() {
        let probe = Probe::new();
        let mut tx = Arc::clone(&probe).transaction();
        tx.run().expect("run");
        tx.save(entity(&probe, "a")).expect("save");
        tx.rollback();

        assert_eq!(probe.calls(), 0);
        assert_eq!(tx.queued_len(), 0);
        tx.run().expect("reusable after rollback");
    }

    #[tokio::test]
    async fn run_refuses_a_transaction_with_queued_work() {
        let probe = Probe::new();
        let mut tx = Arc::clone(&probe).transaction();
        tx.save(entity(&probe, "a")).expect("save");
        let err = tx.run().expect_err("in use");
        assert_eq!(err.to_string(), "transaction in use: Transaction is already in use.");
    }

    #[tokio::test]
    async fn failed_commit_keeps_the_remainder_until_reset() {
        let probe = Probe::new();
        let mut tx = Arc::clone(&probe).transaction();
        tx.run().expect("run");
        tx.save(entity(&probe, "a")).expect("save");
        tx.save(entity(&probe, "fail")).expect("save");
        tx.save(entity(&probe, "c")).expect("save");

        assert!(tx.commit().await.is_err());
        assert_eq!(tx.state(), TransactionState::Committing);
        assert_eq!(tx.queued_len(), 2);
        assert!(probe.get(&entity(&probe, "a").key).await.expect("get").is_some());
        assert!(probe.get(&entity(&probe, "c").key).await.expect("get").is_none());

        assert!(matches!(tx.save(entity(&probe, "d")), Err(Error::TransactionInUse { .. })));
        assert!(matches!(tx.run(), Err(Error::TransactionInUse { .. })));
        assert!(tx.commit().await.is_err());

        tx.reset();
        assert_eq!(tx.state(), TransactionState::Idle);
        tx.run().expect("usable after reset");
    }

    #[tokio::test]
    async fn reads_pass_through() {
        let probe = Probe::new();
        let a = entity(&probe, "a");
        probe.save(&a).await.expect("save");
        let tx = Arc::clone(&probe).transaction();
        assert_eq!(tx.get(&a.key).await.expect("get"), Some(a));
        let page = tx
            .run_query(&tx.create_query("ns", Kind::Apps))
            .await
            .expect("query");
        assert_eq!(page.entities.len(), 1);
    }
}
