//! # seistore-core
//!
//! Shared primitives for the seistore metadata service.
//!
//! - **Errors**: the single error taxonomy used by every crate
//! - **Addressing**: tenants, namespaces and dataset references
//! - **Dataset model**: the metadata record persisted by the journal
//! - **Object storage**: the bulk-copy collaborator used by copy jobs
//! - **Registry**: explicit provider-to-factory maps
//! - **Config and observability**: environment configuration and tracing setup
//!
//! ## Example
//!
//! ```rust
//! use seistore_core::prelude::*;
//!
//! let dataset = DatasetRef::new("acme", "survey", "/raw/", "line-001.segy");
//! assert_eq!(dataset.to_string(), "sd://acme/survey/raw/line-001.segy");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod id;
pub mod observability;
pub mod registry;
pub mod storage;
pub mod tenant;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::SeistoreConfig;
    pub use crate::dataset::{Dataset, TransferStatus};
    pub use crate::error::{Error, Result};
    pub use crate::id::JobId;
    pub use crate::registry::Registry;
    pub use crate::storage::{MemoryObjectStorage, ObjectStorage, StorageRegistry};
    pub use crate::tenant::{DatasetRef, StoreNamespace, Tenant};
}

pub use config::SeistoreConfig;
pub use dataset::{Dataset, TransferStatus};
pub use error::{Error, Result};
pub use id::JobId;
pub use observability::{LogFormat, init_logging};
pub use registry::Registry;
pub use storage::{MemoryObjectStorage, ObjectStorage, StorageRegistry};
pub use tenant::{DatasetRef, StoreNamespace, Tenant};
