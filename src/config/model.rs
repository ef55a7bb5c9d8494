use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::merge::MergeConfig;
use crate::pipeline::config::{JobConfig, ToolConfig};
use crate::worker_pool::WorkerPoolConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tool: ToolConfig,
    pub pool: WorkerPoolConfig,
    pub merge: MergeConfig,
    pub job: JobConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbosity: String,
    /// Empty means log to stderr only.
    pub log_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: "normal".to_string(),
            log_file: String::new(),
        }
    }
}

impl LoggingConfig {
    pub fn log_file_path(&self) -> Option<PathBuf> {
        (!self.log_file.trim().is_empty()).then(|| PathBuf::from(&self.log_file))
    }
}
