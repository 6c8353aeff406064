//! Error types and result aliases for seistore.
//!
//! One taxonomy is shared by the journal, the locker and the copy pipeline so
//! the kind of a failure survives every crate boundary. Callers at the edge
//! (HTTP handlers, job queue handlers) map kinds to status codes through
//! [`Error::is_client_error`].
//!
//! Absence of an entity is never an error: lookups return `Option`.

/// The result type used throughout seistore.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in seistore operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A name violates a backend's charset constraint. Raised before any I/O.
    #[error("invalid name for {kind}: {message}")]
    InvalidName {
        /// Entity kind whose rule was violated.
        kind: String,
        /// Description of the violation.
        message: String,
    },

    /// The query uses an operator the backend cannot express.
    #[error("unsupported operator: {message}")]
    UnsupportedOperator {
        /// Description of the unsupported construct.
        message: String,
    },

    /// A transaction was restarted while operations were still queued.
    #[error("transaction in use: {message}")]
    TransactionInUse {
        /// Description of the conflicting state.
        message: String,
    },

    /// Mutex acquisition gave up after the configured number of attempts.
    #[error("lock acquisition exhausted for {resource} after {attempts} attempts")]
    LockAcquisitionExhausted {
        /// Resource path that could not be locked.
        resource: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The resource is held by a conflicting lock.
    #[error("locked: {message}")]
    Locked {
        /// Description of the conflicting lock.
        message: String,
    },

    /// A copy job failed; the destination was marked aborted and every
    /// resource it held was released.
    #[error("copy job {job_id} aborted: {source}")]
    JobAborted {
        /// Identifier of the aborted job.
        job_id: String,
        /// The failure that aborted the job.
        #[source]
        source: Box<Error>,
    },

    /// The resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A referenced resource was not found where its presence is required.
    #[error("not found: {0}")]
    NotFound(String),

    /// A backend transport or provider call failed.
    ///
    /// The provider's native error code is kept verbatim.
    #[error("backend error{}: {message}", code_suffix(.code.as_deref()))]
    Backend {
        /// Native error code reported by the provider, if any.
        code: Option<String>,
        /// Provider error message.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

fn code_suffix(code: Option<&str>) -> String {
    code.map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl Error {
    /// Creates a backend error without a native code.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a backend error carrying the provider's native error code.
    #[must_use]
    pub fn backend_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: Some(code.into()),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a backend error with a source cause.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            code: None,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an invalid name error for the given kind.
    #[must_use]
    pub fn invalid_name(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidName {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true when the failure is attributable to the caller
    /// (validation or lock contention) rather than the backend.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidName { .. }
            | Self::UnsupportedOperator { .. }
            | Self::TransactionInUse { .. }
            | Self::LockAcquisitionExhausted { .. }
            | Self::Locked { .. }
            | Self::AlreadyExists(_)
            | Self::NotFound(_)
            | Self::InvalidInput(_) => true,
            Self::JobAborted { source, .. } => source.is_client_error(),
            Self::Backend { .. } | Self::Serialization { .. } | Self::Internal { .. } => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
