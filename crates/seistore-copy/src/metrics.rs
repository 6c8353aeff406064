//! Copy pipeline metrics.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `seistore_copy_jobs_total` | Counter | `outcome` |
//! | `seistore_copy_job_duration_seconds` | Histogram | `outcome` |
//! | `seistore_copy_requests_total` | Counter | `result` |
//!
//! Metrics go through the `metrics` facade; installing a recorder is left to
//! the embedding service.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Counter: copy job attempts by outcome.
pub const COPY_JOBS_TOTAL: &str = "seistore_copy_jobs_total";

/// Histogram: copy job attempt duration in seconds.
pub const COPY_JOB_DURATION_SECONDS: &str = "seistore_copy_job_duration_seconds";

/// Counter: copy requests by result.
pub const COPY_REQUESTS_TOTAL: &str = "seistore_copy_requests_total";

static METRICS_REGISTERED: OnceLock<()> = OnceLock::new();

/// Outcome of one copy job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Objects copied and the destination marked completed.
    Completed,
    /// Attempt failed; the queue will run the job again.
    Retried,
    /// Attempt failed and the job is terminally aborted.
    Aborted,
}

impl JobOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Retried => "retried",
            Self::Aborted => "aborted",
        }
    }
}

/// Registers metric descriptions. Safe to call more than once.
pub fn register_metrics() {
    METRICS_REGISTERED.get_or_init(|| {
        describe_counter!(COPY_JOBS_TOTAL, "Copy job attempts by outcome");
        describe_histogram!(
            COPY_JOB_DURATION_SECONDS,
            "Duration of copy job attempts in seconds"
        );
        describe_counter!(COPY_REQUESTS_TOTAL, "Copy requests by result");
    });
}

/// Records the end of a copy job attempt.
pub fn record_job(outcome: JobOutcome, duration_secs: f64) {
    counter!(COPY_JOBS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    histogram!(COPY_JOB_DURATION_SECONDS, "outcome" => outcome.as_str()).record(duration_secs);
}

/// Records how a copy request was answered.
pub fn record_request(result: &'static str) {
    counter!(COPY_REQUESTS_TOTAL, "result" => result).increment(1);
}
