//! Key and identity encoding.
//!
//! A [`Key`] identifies one stored entity: `name` is the local identifier,
//! `partition_key` the backend-level grouping key and `kind` the entity type.
//! Backends differ in how they derive `partition_key` (see each backend
//! module), but they share the rules for deriving `name` from a [`KeySpec`],
//! which live here.
//!
//! # Example
//!
//! ```rust
//! use seistore_journal::key::{DatasetKeyStrategy, Kind, KeySpec, local_name};
//!
//! let spec = KeySpec::new("seismic-store-acme-survey", Kind::SeismicMeta, "/a/b/data.segy");
//! assert_eq!(local_name(&spec).unwrap(), "-a-b-data-segy");
//!
//! let spec = KeySpec::dataset("seismic-store-acme-survey", DatasetKeyStrategy::Enforced)
//!     .at("/a/b/", "data.segy");
//! assert_eq!(local_name(&spec).unwrap(), "/a/b/data.segy");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use seistore_core::error::{Error, Result};
use seistore_core::id::{DEFAULT_ID_LEN, content_hash, random_id};

/// Entity kinds persisted by the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Tenant records.
    Tenants,
    /// Subproject records.
    Subprojects,
    /// Dataset records.
    Datasets,
    /// Seismic metadata records.
    #[serde(rename = "seismicmeta")]
    SeismicMeta,
    /// Registered applications.
    Apps,
}

impl Kind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Tenants,
        Self::Subprojects,
        Self::Datasets,
        Self::SeismicMeta,
        Self::Apps,
    ];

    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tenants => "tenants",
            Self::Subprojects => "subprojects",
            Self::Datasets => "datasets",
            Self::SeismicMeta => "seismicmeta",
            Self::Apps => "apps",
        }
    }

    /// Recovers the kind from a `{namespace}-{kind}` partition key.
    #[must_use]
    pub fn from_partition_key(partition_key: &str) -> Option<Self> {
        partition_key
            .rsplit_once('-')
            .and_then(|(_, kind)| kind.parse().ok())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity kind '{s}'")))
    }
}

/// Identity of a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    /// Local identifier, unique within the partition.
    pub name: String,
    /// Backend-level grouping key.
    pub partition_key: String,
    /// Entity type.
    pub kind: Kind,
    /// Physical table, for backends that keep one table per kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

impl Key {
    /// Creates a key without a table name.
    #[must_use]
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            kind,
            table_name: None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.partition_key, self.name)
    }
}

/// How the local name of a dataset key is derived.
///
/// Both the random and the derived strategies are in use: subprojects created
/// with schema enforcement address datasets by their enforced key, older
/// subprojects by a random identifier located through queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKeyStrategy {
    /// A fresh 16-character alphanumeric identifier.
    RandomId,
    /// Lower-hex SHA-512 of `path + name`.
    ContentHash,
    /// The dataset's full path: folder without trailing `/`, then `/name`.
    Enforced,
}

impl DatasetKeyStrategy {
    /// Returns true when the same dataset always yields the same name, so an
    /// entity can be fetched by key without a query.
    #[must_use]
    pub fn is_deterministic(self) -> bool {
        !matches!(self, Self::RandomId)
    }
}

/// Folder path and name of a dataset, used to derive its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetLocation {
    /// Folder path, `/`-delimited on both ends.
    pub path: String,
    /// Dataset name.
    pub name: String,
}

/// Input to `create_key`: a namespace, a kind and the path segments that
/// follow the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    /// Namespace the entity belongs to.
    pub namespace: String,
    /// Entity kind.
    pub kind: Kind,
    /// The segment following the kind (entity name, or the dataset path for
    /// seismic metadata). Unused for datasets.
    pub name: Option<String>,
    /// Strategy for dataset names.
    pub dataset_strategy: DatasetKeyStrategy,
    /// Dataset location, required by deterministic strategies.
    pub location: Option<DatasetLocation>,
}

impl KeySpec {
    /// Spec for a non-dataset entity named by `name`.
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: Kind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: Some(name.into()),
            dataset_strategy: DatasetKeyStrategy::RandomId,
            location: None,
        }
    }

    /// Spec for a dataset key derived with `strategy`.
    #[must_use]
    pub fn dataset(namespace: impl Into<String>, strategy: DatasetKeyStrategy) -> Self {
        Self {
            namespace: namespace.into(),
            kind: Kind::Datasets,
            name: None,
            dataset_strategy: strategy,
            location: None,
        }
    }

    /// Sets the dataset location.
    #[must_use]
    pub fn at(mut self, path: impl Into<String>, name: impl Into<String>) -> Self {
        self.location = Some(DatasetLocation {
            path: path.into(),
            name: name.into(),
        });
        self
    }
}

/// Replaces every character outside `[A-Za-z0-9_]` with `-`.
#[must_use]
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Derives the local `name` of a key.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the spec lacks the segment its kind
/// requires (a name, or a location for deterministic dataset strategies).
pub fn local_name(spec: &KeySpec) -> Result<String> {
    match spec.kind {
        Kind::Datasets => dataset_name(spec.dataset_strategy, spec.location.as_ref()),
        Kind::SeismicMeta => Ok(sanitize(required_name(spec)?)),
        Kind::Tenants | Kind::Subprojects | Kind::Apps => Ok(required_name(spec)?.to_string()),
    }
}

fn required_name(spec: &KeySpec) -> Result<&str> {
    spec.name.as_deref().ok_or_else(|| {
        Error::InvalidInput(format!("a {} key requires a name segment", spec.kind))
    })
}

fn dataset_name(strategy: DatasetKeyStrategy, location: Option<&DatasetLocation>) -> Result<String> {
    let located = || {
        location.ok_or_else(|| {
            Error::InvalidInput(format!(
                "dataset key strategy {strategy:?} requires a dataset path and name"
            ))
        })
    };
    match strategy {
        DatasetKeyStrategy::RandomId => Ok(random_id(DEFAULT_ID_LEN)),
        DatasetKeyStrategy::ContentHash => {
            let location = located()?;
            Ok(content_hash(&format!("{}{}", location.path, location.name)))
        }
        DatasetKeyStrategy::Enforced => {
            let location = located()?;
            let folder = location.path.strip_suffix('/').unwrap_or(&location.path);
            Ok(format!("{folder}/{}", location.name))
        }
    }
}

/// `{namespace}-{kind}`, the partition key of the document backends.
#[must_use]
pub fn namespaced_partition_key(namespace: &str, kind: Kind) -> String {
    format!("{namespace}-{kind}")
}

/// A per-kind naming constraint checked before any I/O.
#[derive(Debug, Clone, Copy)]
pub struct NameRule {
    /// Kind the rule applies to.
    pub kind: Kind,
    /// Human-readable form of the constraint.
    pub pattern: &'static str,
    /// Returns true when a name satisfies the rule.
    pub check: fn(&str) -> bool,
}

/// Checks `name` against every rule registered for `kind`.
///
/// # Errors
///
/// Returns [`Error::InvalidName`] on the first violated rule.
pub fn validate_name(rules: &[NameRule], kind: Kind, name: &str) -> Result<()> {
    for rule in rules.iter().filter(|r| r.kind == kind) {
        if !(rule.check)(name) {
            return Err(Error::invalid_name(
                kind.as_str(),
                format!("'{name}' does not match {}", rule.pattern),
            ));
        }
    }
    Ok(())
}
