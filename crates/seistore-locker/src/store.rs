//! Lock-store protocol.
//!
//! The locker needs a shared key/value cache with per-key expiry and one
//! atomic primitive, "set if absent". [`LockStore`] names exactly that
//! surface; [`MemoryLockStore`] implements it in process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use seistore_core::error::{Error, Result};

/// Key/value operations the locker needs from the shared cache.
///
/// Every value carries a TTL; an expired key behaves exactly like an absent
/// one.
#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Stores `value` under `key` only if the key is absent. Returns whether
    /// the value was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Stores `value` under `key`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Reads a live value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Removes a key. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes `key` only while it still holds `value`. Returns whether the
    /// key was removed.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    /// Remaining time to live of a live key.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`LockStore`].
///
/// Expiry follows `tokio::time`, so tests can pause and advance the clock.
/// Expired slots are dropped on the next write that touches them.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl MemoryLockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let slots = self.slots.read().map_err(poison_err)?;
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && slot.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut slots = self.slots.write().map_err(poison_err)?;
        if slots.get(key).is_some_and(|slot| slot.is_live(now)) {
            return Ok(false);
        }
        slots.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut slots = self.slots.write().map_err(poison_err)?;
        slots.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let slots = self.slots.read().map_err(poison_err)?;
        Ok(slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut slots = self.slots.write().map_err(poison_err)?;
        Ok(slots.remove(key).is_some_and(|slot| slot.is_live(now)))
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let now = Instant::now();
        let mut slots = self.slots.write().map_err(poison_err)?;
        let matches = slots
            .get(key)
            .is_some_and(|slot| slot.is_live(now) && slot.value == value);
        if matches {
            slots.remove(key);
        }
        Ok(matches)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let slots = self.slots.read().map_err(poison_err)?;
        Ok(slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.expires_at - now))
    }
}

#[allow(clippy::needless_pass_by_value)]
fn poison_err<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::internal("lock store poisoned")
}
