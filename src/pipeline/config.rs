use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::constants::*;
use crate::worker_pool::{NoProgress, ProgressParser, RatioProgressParser, ToolLauncher};

/// How per-unit outputs become the final result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MergeMode {
    /// K-way merge by block key.
    #[default]
    Ordered,
    /// Concatenate in partition order, keeping the first part's header.
    Concatenate { header_lines: usize },
}

/// The external tool run once per partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub program: String,
    /// Argument template; `{input}`, `{output}` and `{index}` are substituted.
    pub args: Vec<String>,
    pub working_directory: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Two-group regex for "completed/total" progress. Unset uses the
    /// built-in ratio pattern, an empty string disables progress parsing.
    pub progress_pattern: Option<String>,
}

impl ToolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Tool program must be set"));
        }
        if let Some(pattern) = self.progress_pattern.as_deref().filter(|p| !p.is_empty()) {
            RatioProgressParser::new(pattern)?;
        }
        Ok(())
    }

    pub fn launcher(&self) -> ToolLauncher {
        let mut launcher = ToolLauncher::new(&self.program).args(self.args.iter().cloned());
        if let Some(dir) = &self.working_directory {
            launcher = launcher.working_dir(dir);
        }
        for (key, value) in &self.env {
            launcher = launcher.env(key, value);
        }
        launcher
    }

    pub fn progress_parser(&self) -> Result<Arc<dyn ProgressParser>> {
        Ok(match self.progress_pattern.as_deref() {
            None => Arc::new(RatioProgressParser::standard()?),
            Some("") => Arc::new(NoProgress),
            Some(pattern) => Arc::new(RatioProgressParser::new(pattern)?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub partitions: usize,
    /// Line prefix that starts a record in the input.
    pub partition_marker: String,
    /// Defaults to a directory next to the output file.
    pub work_directory: Option<String>,
    pub output_suffix: String,
    /// Run the whole pool a second time if the first attempt fails.
    pub retry_once: bool,
    pub keep_intermediate_files: bool,
    pub merge_mode: MergeMode,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            partition_marker: DEFAULT_PARTITION_MARKER.to_string(),
            work_directory: None,
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            retry_once: true,
            keep_intermediate_files: false,
            merge_mode: MergeMode::default(),
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.partitions < MIN_PARTITIONS || self.partitions > MAX_PARTITIONS {
            return Err(anyhow::anyhow!(
                "Partitions must be between {} and {}",
                MIN_PARTITIONS, MAX_PARTITIONS
            ));
        }

        if self.partition_marker.trim().is_empty() {
            return Err(anyhow::anyhow!("Partition marker cannot be empty"));
        }

        if self.output_suffix.is_empty() {
            return Err(anyhow::anyhow!("Output suffix cannot be empty"));
        }

        Ok(())
    }

    pub fn work_dir_for(&self, output: &Path) -> PathBuf {
        match &self.work_directory {
            Some(dir) => PathBuf::from(dir),
            None => output
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_WORK_DIR_NAME),
        }
    }
}
