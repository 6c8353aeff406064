//! Service configuration.
//!
//! Values are read from `SEISTORE_*` environment variables on top of
//! defaults. Every parse failure names the offending variable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observability::LogFormat;
use crate::tenant::StoreNamespace;

/// Default number of copy jobs processed concurrently per process.
pub const DEFAULT_COPY_CONCURRENCY: usize = 50;

/// Default number of attempts the job queue makes for one copy job.
pub const DEFAULT_COPY_MAX_ATTEMPTS: u32 = 10;

/// Default number of mutex acquisition attempts before giving up.
pub const DEFAULT_LOCK_ACQUIRE_MAX_ATTEMPTS: u32 = 100;

/// Runtime configuration for the metadata core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeistoreConfig {
    /// Deployment environment (`dev`, `qa`, `prod`, ...). Appended to the
    /// journal namespace root and prefixed to per-tenant table names.
    pub service_env: Option<String>,
    /// Provider identifier used to pick journal and storage backends.
    pub cloud_provider: String,
    /// Whether new subprojects address datasets by enforced key.
    pub enforce_key: bool,
    /// Maximum copy jobs processed concurrently.
    pub copy_concurrency: usize,
    /// Attempts the job queue makes for one copy job.
    pub copy_max_attempts: u32,
    /// Delay before a failed copy job is retried.
    pub copy_retry_backoff: Duration,
    /// Mutex acquisition attempts before a caller gives up.
    pub lock_acquire_max_attempts: u32,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for SeistoreConfig {
    fn default() -> Self {
        Self {
            service_env: None,
            cloud_provider: "anthos".to_string(),
            enforce_key: false,
            copy_concurrency: DEFAULT_COPY_CONCURRENCY,
            copy_max_attempts: DEFAULT_COPY_MAX_ATTEMPTS,
            copy_retry_backoff: Duration::from_secs(1),
            lock_acquire_max_attempts: DEFAULT_LOCK_ACQUIRE_MAX_ATTEMPTS,
            log_format: LogFormat::default(),
        }
    }
}

impl SeistoreConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable that failed to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a
    /// variable if set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable that failed to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        config.service_env = env.string("SEISTORE_SERVICE_ENV");
        if let Some(provider) = env.string("SEISTORE_CLOUD_PROVIDER") {
            config.cloud_provider = provider.to_ascii_lowercase();
        }
        if let Some(enforce) = env.bool("SEISTORE_ENFORCE_KEY")? {
            config.enforce_key = enforce;
        }
        if let Some(concurrency) = env.usize("SEISTORE_COPY_CONCURRENCY")? {
            if concurrency == 0 {
                return Err(Error::InvalidInput(
                    "SEISTORE_COPY_CONCURRENCY must be at least 1".to_string(),
                ));
            }
            config.copy_concurrency = concurrency;
        }
        if let Some(attempts) = env.u32("SEISTORE_COPY_MAX_ATTEMPTS")? {
            config.copy_max_attempts = attempts.max(1);
        }
        if let Some(ms) = env.u64("SEISTORE_COPY_RETRY_BACKOFF_MS")? {
            config.copy_retry_backoff = Duration::from_millis(ms);
        }
        if let Some(attempts) = env.u32("SEISTORE_LOCK_ACQUIRE_MAX_ATTEMPTS")? {
            config.lock_acquire_max_attempts = attempts.max(1);
        }
        if let Some(format) = env.string("SEISTORE_LOG_FORMAT") {
            config.log_format = parse_log_format("SEISTORE_LOG_FORMAT", &format)?;
        }

        Ok(config)
    }

    /// Namespace builder for the configured environment.
    #[must_use]
    pub fn namespace(&self) -> StoreNamespace {
        StoreNamespace::new(self.service_env.as_deref())
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u32>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<usize>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        parse_bool(name, &v).map(Some)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_log_format(name: &str, value: &str) -> Result<LogFormat> {
    match value.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "pretty" => Ok(LogFormat::Pretty),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be one of: json, pretty"
        ))),
    }
}
