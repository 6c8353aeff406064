//! Copy job wire schema.
//!
//! A [`CopyJob`] is created when a copy request is accepted, while the
//! destination is write locked (and optionally the source read locked). It
//! travels through the job queue as JSON with camelCase field names.

use serde::{Deserialize, Serialize};

use seistore_core::config::SeistoreConfig;
use seistore_core::tenant::{DatasetRef, Tenant};

/// Subproject settings a worker needs to address the destination record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubprojectSettings {
    /// Datasets are stored under their enforced key instead of a random id.
    #[serde(default)]
    pub enforce_key: bool,
}

impl SubprojectSettings {
    /// Settings of subprojects created under `config`.
    #[must_use]
    pub fn from_config(config: &SeistoreConfig) -> Self {
        Self {
            enforce_key: config.enforce_key,
        }
    }
}

/// One bulk copy between two datasets of the same tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyJob {
    /// Owning tenant.
    pub tenant: Tenant,
    /// Source dataset.
    pub dataset_from: DatasetRef,
    /// Destination dataset, registered as a placeholder before enqueue.
    pub dataset_to: DatasetRef,
    /// Bucket holding the source objects.
    pub source_bucket: String,
    /// Bucket receiving the copies.
    pub destination_bucket: String,
    /// Object prefix of the source dataset.
    pub prefix_from: String,
    /// Object prefix of the destination dataset.
    pub prefix_to: String,
    /// User on whose behalf the objects are copied.
    pub usermail: String,
    /// Read lock held on the source, released when the job completes.
    pub readlock_id: Option<String>,
    /// Write lock held on the destination, stored as its `sbit`.
    pub sbit: String,
    /// Destination subproject settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subproject: Option<SubprojectSettings>,
}

impl CopyJob {
    /// Whether the destination record is addressed by its enforced key.
    #[must_use]
    pub fn enforce_key(&self) -> bool {
        self.subproject.is_some_and(|s| s.enforce_key)
    }

    /// Lock key of the source dataset.
    #[must_use]
    pub fn source_path(&self) -> String {
        self.dataset_from.lock_key()
    }

    /// Lock key of the destination dataset.
    #[must_use]
    pub fn destination_path(&self) -> String {
        self.dataset_to.lock_key()
    }
}
