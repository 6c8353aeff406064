//! Identifier generation.
//!
//! Two families of identifiers exist:
//! - **Random alphanumeric ids** (`[A-Za-z0-9]{n}`) used for dataset keys,
//!   change tags, storage bits and lock ids. Their format is part of the
//!   persisted data and must not change.
//! - **ULID-based ids** for process-local objects such as queued copy jobs.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Length of generated dataset keys, change tags and storage bits.
pub const DEFAULT_ID_LEN: usize = 16;

/// Generates a random identifier of `len` characters drawn from `[A-Za-z0-9]`.
#[must_use]
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates a new change tag.
#[must_use]
pub fn new_ctag() -> String {
    random_id(DEFAULT_ID_LEN)
}

/// Returns the lower-hex SHA-512 digest of `input`.
#[must_use]
pub fn content_hash(input: &str) -> String {
    hex::encode(Sha512::digest(input.as_bytes()))
}

/// A unique identifier for a queued copy job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    /// Generates a new unique job ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid job ID '{s}': {e}")))
    }
}
