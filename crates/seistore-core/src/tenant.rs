//! Tenant, subproject and dataset addressing.
//!
//! Every piece of metadata lives under a namespace derived from the tenant and
//! subproject it belongs to, and every dataset is addressed by a
//! [`DatasetRef`]. The string forms produced here are persisted (journal
//! namespaces) or shared across instances (lock keys), so they are stable.
//!
//! # Example
//!
//! ```rust
//! use seistore_core::tenant::{DatasetRef, StoreNamespace};
//!
//! let ns = StoreNamespace::new(Some("dev"));
//! assert_eq!(ns.subproject("acme", "survey"), "seismic-store-dev-acme-survey");
//!
//! let dataset = DatasetRef::new("acme", "survey", "a/b", "data.segy");
//! assert_eq!(dataset.lock_key(), "acme/survey/a/b/data.segy");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root of every journal namespace.
pub const SEISMIC_STORE_NS: &str = "seismic-store";

/// Prefix of user-facing dataset paths.
pub const SDPATH_PREFIX: &str = "sd://";

/// Builds journal namespaces for one service environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNamespace {
    root: String,
}

impl StoreNamespace {
    /// Creates the namespace builder. `service_env` is appended to the root
    /// when present.
    #[must_use]
    pub fn new(service_env: Option<&str>) -> Self {
        let root = match service_env {
            Some(env) if !env.is_empty() => format!("{SEISMIC_STORE_NS}-{env}"),
            _ => SEISMIC_STORE_NS.to_string(),
        };
        Self { root }
    }

    /// Namespace holding tenant-level records.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Namespace holding the records of one subproject.
    #[must_use]
    pub fn subproject(&self, tenant: &str, subproject: &str) -> String {
        format!("{}-{tenant}-{subproject}", self.root)
    }

    /// Splits a subproject namespace back into `(tenant, subproject)`.
    ///
    /// Returns `None` for namespaces outside this root or without both parts.
    #[must_use]
    pub fn parse_subproject<'a>(&self, namespace: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = namespace.strip_prefix(self.root.as_str())?.strip_prefix('-')?;
        let (tenant, subproject) = rest.split_once('-')?;
        if tenant.is_empty() || subproject.is_empty() {
            return None;
        }
        Some((tenant, subproject))
    }
}

impl Default for StoreNamespace {
    fn default() -> Self {
        Self::new(None)
    }
}

/// A tenant registered in the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant name.
    pub name: String,
    /// Entitlement service domain, `{dataPartition}.{domain}`.
    pub esd: String,
    /// Cloud project (or account) backing the tenant.
    pub gcpid: String,
}

impl Tenant {
    /// Creates a tenant record.
    #[must_use]
    pub fn new(name: impl Into<String>, esd: impl Into<String>, gcpid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            esd: esd.into(),
            gcpid: gcpid.into(),
        }
    }

    /// Returns the data partition encoded in the entitlement domain.
    #[must_use]
    pub fn data_partition(&self) -> &str {
        self.esd.split('.').next().unwrap_or(&self.esd)
    }
}

/// Normalizes a dataset folder path to `/`-delimited form with leading and
/// trailing separators (`a/b` becomes `/a/b/`, the empty path becomes `/`).
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// Address of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    /// Owning tenant.
    pub tenant: String,
    /// Owning subproject.
    pub subproject: String,
    /// Folder path, always `/`-delimited on both ends.
    pub path: String,
    /// Dataset name within the folder.
    pub name: String,
}

impl DatasetRef {
    /// Creates a dataset reference, normalizing the folder path.
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        subproject: impl Into<String>,
        path: &str,
        name: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            subproject: subproject.into(),
            path: normalize_path(path),
            name: name.into(),
        }
    }

    /// Key under which locks for this dataset are held.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("{}/{}{}{}", self.tenant, self.subproject, self.path, self.name)
    }

    /// Enforced journal key: the folder path without its trailing separator,
    /// followed by `/name`.
    #[must_use]
    pub fn enforced_key(&self) -> String {
        let folder = self.path.strip_suffix('/').unwrap_or(&self.path);
        format!("{folder}/{}", self.name)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SDPATH_PREFIX}{}/{}{}{}",
            self.tenant, self.subproject, self.path, self.name
        )
    }
}
