//! Test object storage with operation tracing.
//!
//! Wraps [`MemoryObjectStorage`] and records every copy for test assertions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use seistore_core::error::{Error, Result};
use seistore_core::storage::{MemoryObjectStorage, ObjectStorage};

/// Record of a copy request for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOp {
    /// Source bucket.
    pub source_bucket: String,
    /// Source prefix.
    pub prefix_from: String,
    /// Destination bucket.
    pub destination_bucket: String,
    /// Destination prefix.
    pub prefix_to: String,
    /// User the copy ran for.
    pub owner_email: String,
    /// Whether the copy succeeded.
    pub succeeded: bool,
}

/// In-memory object storage with operation tracing.
#[derive(Debug, Clone, Default)]
pub struct TracingObjectStorage {
    inner: MemoryObjectStorage,
    operations: Arc<Mutex<Vec<CopyOp>>>,
    fail_prefixes: Arc<Mutex<Vec<String>>>,
    fail_next: Arc<Mutex<usize>>,
    latency: Option<Duration>,
}

impl TracingObjectStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage whose copies take `latency`.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// The wrapped storage, for seeding and inspecting objects.
    pub fn objects(&self) -> &MemoryObjectStorage {
        &self.inner
    }

    /// Returns all recorded copies.
    #[must_use]
    pub fn operations(&self) -> Vec<CopyOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Makes every copy whose source prefix starts with `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_prefixes.lock().expect("lock").push(prefix.into());
    }

    /// Makes the next `count` copies fail, whatever their prefix.
    pub fn fail_next(&self, count: usize) {
        *self.fail_next.lock().expect("lock") = count;
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_prefixes.lock().expect("lock").clear();
        *self.fail_next.lock().expect("lock") = 0;
    }

    fn should_fail(&self, prefix_from: &str) -> bool {
        let mut remaining = self.fail_next.lock().expect("lock");
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        drop(remaining);
        self.fail_prefixes
            .lock()
            .expect("lock")
            .iter()
            .any(|p| prefix_from.starts_with(p.as_str()))
    }
}

#[async_trait]
impl ObjectStorage for TracingObjectStorage {
    async fn copy(
        &self,
        source_bucket: &str,
        prefix_from: &str,
        destination_bucket: &str,
        prefix_to: &str,
        owner_email: &str,
    ) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let result = if self.should_fail(prefix_from) {
            Err(Error::backend_with_code(
                "503",
                format!("injected copy failure for {source_bucket}/{prefix_from}"),
            ))
        } else {
            self.inner
                .copy(source_bucket, prefix_from, destination_bucket, prefix_to, owner_email)
                .await
        };
        self.operations.lock().expect("lock").push(CopyOp {
            source_bucket: source_bucket.to_string(),
            prefix_from: prefix_from.to_string(),
            destination_bucket: destination_bucket.to_string(),
            prefix_to: prefix_to.to_string(),
            owner_email: owner_email.to_string(),
            succeeded: result.is_ok(),
        });
        result
    }
}
