//! Shared test utilities for seistore tests.
//!
//! This crate provides:
//! - [`TracingObjectStorage`]: in-memory object storage with operation recording
//!   and failure injection
//! - [`Recording`]: journal client wrapper counting every store call
//! - [`TestContext`]: journals, storage and locker wired for one provider
//! - [`DatasetFactory`]: dataset records ready to register
//!
//! # Example
//!
//! ```rust,ignore
//! use seistore_test_utils::{DatasetFactory, TestContext};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new("anthos");
//!     let source = ctx.seed(DatasetFactory::at(&ctx.tenant, "/raw/", "a.segy")).await;
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities panic on broken fixtures
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod journal;
pub mod storage;

pub use fixtures::*;
pub use journal::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("seistore=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
