//! # seistore-locker
//!
//! Single-writer/multi-reader arbitration of dataset paths over a shared,
//! TTL-backed lock store.
//!
//! - [`LockStore`]: the key/value protocol the locker needs
//! - [`MemoryLockStore`]: in-process implementation driven by `tokio::time`
//! - [`Locker`]: path mutexes plus read and write locks
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use seistore_locker::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let locker = Locker::new(Arc::new(MemoryLockStore::new()));
//! let read = locker.lock("acme/survey/a.segy", LockMode::Read).await.unwrap();
//! assert!(locker.lock("acme/survey/a.segy", LockMode::Write).await.is_err());
//! locker.unlock("acme/survey/a.segy", &read.id).await.unwrap();
//! # });
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod locker;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::locker::{LockGrant, LockMode, LockValue, Locker, MutexToken};
    pub use crate::store::{LockStore, MemoryLockStore};
}

pub use locker::{LockGrant, LockMode, LockValue, Locker, MutexToken};
pub use store::{LockStore, MemoryLockStore};
