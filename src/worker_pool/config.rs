use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::worker_pool::constants::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub max_threads: usize,
    pub poll_interval_ms: u64,
    pub timeout_seconds: u64,
    pub fail_fast: bool,
    pub console_error_patterns: Vec<String>,
    pub ignored_stderr_patterns: Vec<String>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            fail_fast: false,
            console_error_patterns: DEFAULT_CONSOLE_ERROR_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            ignored_stderr_patterns: DEFAULT_IGNORED_STDERR_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_threads < MIN_MAX_THREADS || self.max_threads > MAX_MAX_THREADS {
            return Err(anyhow::anyhow!(
                "Max threads must be between {} and {}",
                MIN_MAX_THREADS, MAX_MAX_THREADS
            ));
        }

        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(anyhow::anyhow!(
                "Poll interval must be at least {} ms",
                MIN_POLL_INTERVAL_MS
            ));
        }

        if self.timeout_seconds < MIN_TIMEOUT_SECONDS || self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(anyhow::anyhow!(
                "Timeout must be between {} and {} seconds",
                MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
