//! Batch configuration shared by the queue and storage managers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::batch::{DEFAULT_MAX_ATTEMPTS, Dispatcher, RetryPolicy, default_parallelism};
use crate::error::ConfigError;

/// Retry and worker pool settings for batch uploads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Total attempts per batch, including the first (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds to wait between attempts (default: 5).
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    /// Worker pool size. Defaults to the host's available parallelism.
    #[serde(default)]
    pub parallelism: Option<usize>,
    /// Log a completed/total line per finished batch (default: true).
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            parallelism: None,
            progress: default_progress(),
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_secs() -> f64 {
    5.0
}

fn default_progress() -> bool {
    true
}

impl BatchConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.parallelism == Some(0) {
            return Err(ConfigError::ZeroParallelism);
        }
        if Duration::try_from_secs_f64(self.retry_delay_secs).is_err() {
            return Err(ConfigError::InvalidRetryDelay {
                value: self.retry_delay_secs,
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or_default();
        RetryPolicy::new(self.max_retries, delay)
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(default_parallelism)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.parallelism(), self.retry_policy()).with_progress(self.progress)
    }
}
