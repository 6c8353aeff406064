//! Dataset metadata record.
//!
//! The record is persisted as the `data` payload of a journal entity. Field
//! names are the stored wire names; fields this crate does not interpret are
//! kept in [`Dataset::extra`] so a read-modify-write cycle never drops them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::new_ctag;
use crate::tenant::DatasetRef;

/// Change tag assigned to records written before change tags existed.
pub const LEGACY_CTAG: &str = "0000000000000000";

/// Outcome of the most recent copy job targeting a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Placeholder registered, no copy outcome recorded yet.
    #[default]
    #[serde(rename = "")]
    Unset,
    /// A copy job has been accepted and not finished.
    InProgress,
    /// The copy job finished successfully.
    Completed,
    /// The copy job failed and released its resources.
    Aborted,
}

impl TransferStatus {
    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Aborted => "Aborted",
        }
    }
}

/// Dataset metadata as stored in the journal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset name.
    pub name: String,
    /// Owning tenant.
    #[serde(default)]
    pub tenant: String,
    /// Owning subproject.
    #[serde(default)]
    pub subproject: String,
    /// Folder path (`/`-delimited on both ends).
    pub path: String,
    /// Change tag, regenerated on every write.
    #[serde(default)]
    pub ctag: String,
    /// Storage resource URI (`bucket/prefix`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcsurl: Option<String>,
    /// Legal tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltag: Option<String>,
    /// Lock identifier(s) currently associated with the dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbit: Option<String>,
    /// Number of locks currently associated with the dataset.
    #[serde(default)]
    pub sbit_count: u32,
    /// Creator identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    /// Last modification timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date: Option<String>,
    /// Linked seismic metadata record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seismicmeta_guid: Option<String>,
    /// Search tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gtags: Vec<String>,
    /// Read-only flag.
    #[serde(default)]
    pub readonly: bool,
    /// Outcome of the last copy into this dataset. Absent when the dataset
    /// was never a copy destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_status: Option<TransferStatus>,
    /// Fields not interpreted by this crate.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dataset {
    /// Creates a dataset record for the given address.
    #[must_use]
    pub fn new(dataset: &DatasetRef) -> Self {
        Self {
            name: dataset.name.clone(),
            tenant: dataset.tenant.clone(),
            subproject: dataset.subproject.clone(),
            path: dataset.path.clone(),
            ..Self::default()
        }
    }

    /// Returns the address of this dataset.
    #[must_use]
    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef {
            tenant: self.tenant.clone(),
            subproject: self.subproject.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
        }
    }

    /// Assigns a fresh change tag.
    pub fn touch(&mut self) {
        self.ctag = new_ctag();
    }

    /// Fills fields that records written by older versions may lack.
    pub fn fill_defaults(&mut self, tenant: &str, subproject: &str) {
        if self.tenant.is_empty() {
            self.tenant = tenant.to_string();
        }
        if self.subproject.is_empty() {
            self.subproject = subproject.to_string();
        }
        if self.ctag.is_empty() {
            self.ctag = LEGACY_CTAG.to_string();
        }
    }

    /// Splits [`Dataset::gcsurl`] into `(bucket, prefix)`.
    ///
    /// Returns `None` when no storage resource is recorded.
    #[must_use]
    pub fn storage_location(&self) -> Option<(&str, &str)> {
        let url = self.gcsurl.as_deref()?;
        Some(url.split_once('/').unwrap_or((url, "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transfer_status_wire_values() {
        assert_eq!(serde_json::to_value(TransferStatus::Unset).expect("ser"), json!(""));
        assert_eq!(
            serde_json::from_value::<TransferStatus>(json!("Aborted")).expect("de"),
            TransferStatus::Aborted
        );
        assert_eq!(TransferStatus::InProgress.as_str(), "InProgress");
    }

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = json!({
            "name": "data.segy",
            "path": "/a/",
            "metadata": {"k": 1},
            "transfer_status": "",
        });
        let ds: Dataset = serde_json::from_value(raw).expect("de");
        assert_eq!(ds.transfer_status, Some(TransferStatus::Unset));
        assert_eq!(ds.extra.get("metadata"), Some(&json!({"k": 1})));

        let back = serde_json::to_value(&ds).expect("ser");
        assert_eq!(back["metadata"], json!({"k": 1}));
        assert_eq!(back["transfer_status"], json!(""));
    }

    #[test]
    fn fill_defaults_keeps_existing_values() {
        let mut ds = Dataset {
            name: "n".into(),
            tenant: "acme".into(),
            ctag: "abc".into(),
            ..Dataset::default()
        };
        ds.fill_defaults("other", "survey");
        assert_eq!(ds.tenant, "acme");
        assert_eq!(ds.subproject, "survey");
        assert_eq!(ds.ctag, "abc");
    }

    #[test]
    fn storage_location_splits_bucket() {
        let ds = Dataset {
            gcsurl: Some("bucket-1/prefix/xyz".into()),
            ..Dataset::default()
        };
        assert_eq!(ds.storage_location(), Some(("bucket-1", "prefix/xyz")));
    }
}
