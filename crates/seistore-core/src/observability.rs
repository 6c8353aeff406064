//! Observability infrastructure for seistore.
//!
//! Structured logging with consistent spans. The span helpers keep field
//! names identical across the journal, the locker and the copy pipeline so
//! log queries can join on them.

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `seistore_copy=debug`)
///
/// # Example
///
/// ```rust
/// use seistore_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for journal operations.
///
/// # Example
///
/// ```rust
/// use seistore_core::observability::journal_span;
///
/// let span = journal_span("run_query", "scan", "seismic-store-acme-survey");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn journal_span(operation: &str, backend: &str, namespace: &str) -> Span {
    tracing::info_span!(
        "journal",
        op = operation,
        backend = backend,
        namespace = namespace,
    )
}

/// Creates a span for locker operations on one resource path.
#[must_use]
pub fn locker_span(operation: &str, resource: &str) -> Span {
    tracing::info_span!("locker", op = operation, resource = resource)
}

/// Creates a span covering one attempt of a copy job.
#[must_use]
pub fn copy_job_span(job_id: &str, attempt: u32, from: &str, to: &str) -> Span {
    tracing::info_span!(
        "copy_job",
        job_id = job_id,
        attempt = attempt,
        from = from,
        to = to,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_span_helpers_create_spans() {
        let span = journal_span("save", "sql-api", "seismic-store-acme-survey");
        let _guard = span.enter();
        tracing::info!("journal message");

        let span = copy_job_span("01J", 1, "sd://a/b/c", "sd://a/b/d");
        let _guard = span.enter();
        tracing::info!("copy message");
    }
}
