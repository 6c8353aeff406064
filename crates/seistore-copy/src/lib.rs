//! # seistore-copy
//!
//! Asynchronous bulk copy of one dataset onto another.
//!
//! A copy runs in two phases:
//!
//! 1. [`CopyRequests::submit`] write locks the destination, optionally read
//!    locks the source, registers the destination as an `InProgress`
//!    placeholder and enqueues a [`CopyJob`].
//! 2. A [`CopyWorkerPool`] drains the [`JobQueue`]. Each job runs through the
//!    [`CopyProcessor`], which copies the objects under the destination
//!    mutex, marks the destination `Completed` and releases the locks, or
//!    clears them and marks the destination `Aborted`.
//!
//! ## Example
//!
//! ```rust,ignore
//! let queue = Arc::new(InMemoryJobQueue::new("copy"));
//! let requests = CopyRequests::new(Arc::clone(&context), queue.clone());
//! requests.submit(&request).await?;
//! queue.close().await?;
//!
//! let pool = Arc::new(CopyWorkerPool::new(queue, CopyProcessor::new(context)));
//! pool.run().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod context;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod request;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::context::CopyContext;
    pub use crate::job::{CopyJob, SubprojectSettings};
    pub use crate::pool::CopyWorkerPool;
    pub use crate::processor::CopyProcessor;
    pub use crate::queue::{FailedJob, InMemoryJobQueue, JobQueue, QueuedJob, RetryPolicy};
    pub use crate::request::{CopyRequest, CopyRequests, CopySubmission};
}

pub use context::CopyContext;
pub use job::{CopyJob, SubprojectSettings};
pub use pool::CopyWorkerPool;
pub use processor::{CopyProcessor, is_permanent_failure};
pub use queue::{FailedJob, InMemoryJobQueue, JobQueue, QueuedJob, RetryPolicy};
pub use request::{CopyRequest, CopyRequests, CopySubmission};
