//! Mutex and read/write lock arbitration over a [`LockStore`].
//!
//! # Keyspace
//!
//! | key | value | TTL |
//! |-----|-------|-----|
//! | `locks:{path}` | mutex token | 6 s |
//! | `{path}` | write lock id `W…` | 24 h |
//! | `{path}` | read set `rms:R…:R…` | 1 h + 5 min |
//! | `{path}/{id}` | read session `R…` | 1 h |
//!
//! A path holds either one write lock or a set of read sessions, never both.
//! Each read session has its own key so it expires independently; sessions
//! whose key has expired are pruned from the read set the next time the
//! path is locked or unlocked.
//!
//! Every lock and unlock runs under the path's mutex, acquired with a
//! bounded number of attempts. TTLs are the only recovery from a holder
//! that crashes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::Instrument;

use seistore_core::config::{DEFAULT_LOCK_ACQUIRE_MAX_ATTEMPTS, SeistoreConfig};
use seistore_core::error::{Error, Result};
use seistore_core::id::{DEFAULT_ID_LEN, random_id};
use seistore_core::observability::locker_span;

use crate::store::LockStore;

/// Lifetime of a path mutex.
pub const MUTEX_TTL: Duration = Duration::from_millis(6000);

/// Lifetime of a write lock.
pub const WRITE_LOCK_TTL: Duration = Duration::from_secs(86_400);

/// Lifetime of one read session.
pub const READ_LOCK_TTL: Duration = Duration::from_secs(3_600);

/// Extra lifetime of the read set over its sessions, so the set outlives
/// the sessions it lists.
const READ_SET_MARGIN: Duration = Duration::from_secs(300);

/// Random characters after the mode prefix of a lock id.
const LOCK_ID_LEN: usize = 15;

const READ_SET_PREFIX: &str = "rms:";

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Requested lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access; any number of readers may coexist.
    Read,
    /// Exclusive access.
    Write,
}

impl LockMode {
    /// First character of every lock id of this mode.
    #[must_use]
    pub const fn id_prefix(self) -> char {
        match self {
            Self::Read => 'R',
            Self::Write => 'W',
        }
    }

    fn generate_id(self) -> String {
        format!("{}{}", self.id_prefix(), random_id(LOCK_ID_LEN))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Lock state of a path as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockValue {
    /// One write lock.
    Write(String),
    /// Read session ids.
    Read(Vec<String>),
}

impl LockValue {
    /// Parses a stored value: `rms:` prefixes a read set, anything else is a
    /// write lock id.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        match raw.strip_prefix(READ_SET_PREFIX) {
            Some(ids) => Self::Read(
                ids.split(':')
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            None => Self::Write(raw.to_string()),
        }
    }

    /// Stored form of the value.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Write(id) => id.clone(),
            Self::Read(ids) => format!("{READ_SET_PREFIX}{}", ids.join(":")),
        }
    }

    /// Whether this is a write lock.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }

    /// Whether `id` is the write lock or one of the read sessions.
    #[must_use]
    pub fn holds(&self, id: &str) -> bool {
        match self {
            Self::Write(held) => held == id,
            Self::Read(ids) => ids.iter().any(|held| held == id),
        }
    }

    /// Number of holders.
    #[must_use]
    pub fn holders(&self) -> usize {
        match self {
            Self::Write(_) => 1,
            Self::Read(ids) => ids.len(),
        }
    }
}

/// A granted lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// Lock id, needed to unlock.
    pub id: String,
    /// Granted mode.
    pub mode: LockMode,
    /// Holders of the path after the grant.
    pub holders: usize,
    /// True when the idempotency key already held the lock.
    pub idempotent: bool,
}

/// Proof of holding a path mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexToken {
    value: String,
}

/// Arbitrates single-writer/multi-reader access to resource paths.
pub struct Locker {
    store: Arc<dyn LockStore>,
    max_attempts: u32,
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Locker {
    /// Creates a locker over `store` with the default acquisition bound.
    #[must_use]
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_LOCK_ACQUIRE_MAX_ATTEMPTS,
        }
    }

    /// Creates a locker with the mutex attempt bound of `config`.
    #[must_use]
    pub fn from_config(store: Arc<dyn LockStore>, config: &SeistoreConfig) -> Self {
        Self::new(store).with_max_attempts(config.lock_acquire_max_attempts)
    }

    /// Sets how many times [`Locker::acquire_mutex_with_retries`] tries
    /// before giving up.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    /// Whether `lock_id` names a write lock.
    #[must_use]
    pub fn is_write_lock(lock_id: &str) -> bool {
        lock_id.starts_with(LockMode::Write.id_prefix())
    }

    /// Makes one attempt at the mutex of `path`. `None` means it is held
    /// elsewhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn acquire_mutex(&self, path: &str) -> Result<Option<MutexToken>> {
        let value = random_id(DEFAULT_ID_LEN);
        let acquired = self
            .store
            .set_if_absent(&mutex_key(path), &value, MUTEX_TTL)
            .await?;
        Ok(acquired.then_some(MutexToken { value }))
    }

    /// Acquires the mutex of `path`, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockAcquisitionExhausted`] after the configured
    /// number of attempts, or the store's error.
    pub async fn acquire_mutex_with_retries(&self, path: &str) -> Result<MutexToken> {
        let mut backoff = BACKOFF_BASE;
        for attempt in 1..=self.max_attempts {
            if let Some(token) = self.acquire_mutex(path).await? {
                return Ok(token);
            }
            if attempt == self.max_attempts {
                break;
            }
            tracing::debug!(resource = path, attempt, "mutex held elsewhere, retrying");
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..50));
            tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter).await;
            backoff = backoff.saturating_mul(2);
        }
        tracing::warn!(resource = path, attempts = self.max_attempts, "mutex acquisition exhausted");
        Err(Error::LockAcquisitionExhausted {
            resource: path.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Releases the mutex of `path` if `token` still holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn release_mutex(&self, token: &MutexToken, path: &str) -> Result<()> {
        let released = self
            .store
            .delete_if_equals(&mutex_key(path), &token.value)
            .await?;
        if !released {
            tracing::debug!(resource = path, "mutex expired before release");
        }
        Ok(())
    }

    /// Locks `path` with a generated id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] on a conflicting lock, or
    /// [`Error::LockAcquisitionExhausted`] if the mutex stays busy.
    pub async fn lock(&self, path: &str, mode: LockMode) -> Result<LockGrant> {
        self.lock_with(path, mode, None).await
    }

    /// Locks `path`, using `idempotency_key` as the lock id when given.
    ///
    /// Repeating a call with a key that already holds the lock succeeds
    /// without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the key does not start with the
    /// mode's prefix (`W` or `R`), [`Error::Locked`] on a conflicting lock,
    /// or [`Error::LockAcquisitionExhausted`] if the mutex stays busy.
    pub async fn lock_with(
        &self,
        path: &str,
        mode: LockMode,
        idempotency_key: Option<&str>,
    ) -> Result<LockGrant> {
        if idempotency_key.is_some_and(|key| !key.starts_with(mode.id_prefix())) {
            return Err(Error::InvalidInput(format!(
                "the idempotency key of a {mode} lock must start with '{}'",
                mode.id_prefix()
            )));
        }
        async {
            let token = self.acquire_mutex_with_retries(path).await?;
            let outcome = self.grant(path, mode, idempotency_key).await;
            self.finish(&token, path, outcome).await
        }
        .instrument(locker_span("lock", path))
        .await
    }

    /// Removes the lock `lock_id` from `path`. Returns the number of holders
    /// left. Unlocking a free path is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the path is locked under other ids,
    /// or [`Error::LockAcquisitionExhausted`] if the mutex stays busy.
    pub async fn unlock(&self, path: &str, lock_id: &str) -> Result<usize> {
        async {
            let token = self.acquire_mutex_with_retries(path).await?;
            let outcome = self.release(path, lock_id).await;
            self.finish(&token, path, outcome).await
        }
        .instrument(locker_span("unlock", path))
        .await
    }

    /// Removes every lock on `path` under its mutex.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockAcquisitionExhausted`] if the mutex stays busy,
    /// or the store's error.
    pub async fn unlock_all(&self, path: &str) -> Result<()> {
        async {
            let token = self.acquire_mutex_with_retries(path).await?;
            let outcome = self.clear(path).await;
            self.finish(&token, path, outcome).await
        }
        .instrument(locker_span("unlock_all", path))
        .await
    }

    /// Force-clears every lock on `path` without taking its mutex. Meant for
    /// failure cleanup.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn del(&self, path: &str) -> Result<()> {
        self.clear(path)
            .instrument(locker_span("del", path))
            .await
    }

    /// Current lock of `path`, ignoring expired read sessions.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn get_lock(&self, path: &str) -> Result<Option<LockValue>> {
        match self.stored_lock(path).await? {
            Some(LockValue::Read(ids)) => {
                let live = self.live_sessions(path, ids).await?;
                Ok((!live.is_empty()).then_some(LockValue::Read(live)))
            }
            other => Ok(other),
        }
    }

    async fn grant(
        &self,
        path: &str,
        mode: LockMode,
        idempotency_key: Option<&str>,
    ) -> Result<LockGrant> {
        let current = self.pruned_lock(path).await?;
        if let (Some(key), Some(held)) = (idempotency_key, &current) {
            if held.holds(key) && held.is_write() == (mode == LockMode::Write) {
                return Ok(LockGrant {
                    id: key.to_string(),
                    mode,
                    holders: held.holders(),
                    idempotent: true,
                });
            }
        }

        let id = idempotency_key.map_or_else(|| mode.generate_id(), str::to_string);
        match (mode, current) {
            (LockMode::Write, None) => {
                self.store.set(path, &id, WRITE_LOCK_TTL).await?;
                tracing::debug!(resource = path, lock_id = %id, "write lock granted");
                Ok(LockGrant {
                    id,
                    mode,
                    holders: 1,
                    idempotent: false,
                })
            }
            (LockMode::Read, None) => self.add_reader(path, Vec::new(), id).await,
            (LockMode::Read, Some(LockValue::Read(ids))) => self.add_reader(path, ids, id).await,
            (_, Some(held)) => Err(Error::Locked {
                message: format!(
                    "{path} is {} locked",
                    if held.is_write() { "write" } else { "read" }
                ),
            }),
        }
    }

    async fn add_reader(&self, path: &str, mut ids: Vec<String>, id: String) -> Result<LockGrant> {
        self.store
            .set(&session_key(path, &id), &id, READ_LOCK_TTL)
            .await?;
        ids.push(id.clone());
        let holders = ids.len();
        self.store
            .set(path, &LockValue::Read(ids).encode(), READ_LOCK_TTL + READ_SET_MARGIN)
            .await?;
        tracing::debug!(resource = path, lock_id = %id, holders, "read lock granted");
        Ok(LockGrant {
            id,
            mode: LockMode::Read,
            holders,
            idempotent: false,
        })
    }

    async fn release(&self, path: &str, lock_id: &str) -> Result<usize> {
        match self.pruned_lock(path).await? {
            None => Ok(0),
            Some(LockValue::Write(held)) => {
                if held != lock_id {
                    return Err(Error::NotFound(format!(
                        "{path} has been locked with a different id"
                    )));
                }
                self.store.delete(path).await?;
                Ok(0)
            }
            Some(LockValue::Read(ids)) => {
                if !ids.iter().any(|held| held == lock_id) {
                    return Err(Error::NotFound(format!(
                        "{path} has been locked with different ids"
                    )));
                }
                self.store.delete(&session_key(path, lock_id)).await?;
                let remaining: Vec<String> = ids.into_iter().filter(|held| held != lock_id).collect();
                let holders = remaining.len();
                self.rewrite_read_set(path, remaining).await?;
                Ok(holders)
            }
        }
    }

    async fn clear(&self, path: &str) -> Result<()> {
        if let Some(LockValue::Read(ids)) = self.stored_lock(path).await? {
            for id in ids {
                self.store.delete(&session_key(path, &id)).await?;
            }
        }
        self.store.delete(path).await?;
        Ok(())
    }

    /// Releases the mutex, then surfaces the operation's outcome first.
    async fn finish<T>(&self, token: &MutexToken, path: &str, outcome: Result<T>) -> Result<T> {
        let released = self.release_mutex(token, path).await;
        let value = outcome?;
        released?;
        Ok(value)
    }

    async fn stored_lock(&self, path: &str) -> Result<Option<LockValue>> {
        Ok(self
            .store
            .get(path)
            .await?
            .map(|raw| LockValue::decode(&raw)))
    }

    /// Reads the lock of `path` and drops expired read sessions from the
    /// stored read set. Callers must hold the mutex.
    async fn pruned_lock(&self, path: &str) -> Result<Option<LockValue>> {
        match self.stored_lock(path).await? {
            Some(LockValue::Read(ids)) => {
                let before = ids.len();
                let live = self.live_sessions(path, ids).await?;
                if live.len() != before {
                    tracing::debug!(resource = path, expired = before - live.len(), "pruned read sessions");
                    self.rewrite_read_set(path, live.clone()).await?;
                }
                Ok((!live.is_empty()).then_some(LockValue::Read(live)))
            }
            other => Ok(other),
        }
    }

    async fn live_sessions(&self, path: &str, ids: Vec<String>) -> Result<Vec<String>> {
        let mut live = Vec::with_capacity(ids.len());
        for id in ids {
            if self.store.get(&session_key(path, &id)).await?.is_some() {
                live.push(id);
            }
        }
        Ok(live)
    }

    /// Stores `ids` as the read set of `path` keeping its remaining TTL, or
    /// removes the set when empty.
    async fn rewrite_read_set(&self, path: &str, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            self.store.delete(path).await?;
            return Ok(());
        }
        let ttl = self
            .store
            .ttl(path)
            .await?
            .unwrap_or(READ_LOCK_TTL + READ_SET_MARGIN);
        self.store.set(path, &LockValue::Read(ids).encode(), ttl).await
    }
}

fn mutex_key(path: &str) -> String {
    format!("locks:{path}")
}

fn session_key(path: &str, id: &str) -> String {
    format!("{path}/{id}")
}
