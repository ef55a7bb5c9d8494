use anyhow::{Context, Result};
use regex::Regex;

use crate::worker_pool::config::WorkerPoolConfig;

/// Classifies console lines a worker sees from its tool.
#[derive(Debug, Clone, Default)]
pub struct ConsoleFilter {
    console_errors: Vec<Regex>,
    ignored_stderr: Vec<Regex>,
}

impl ConsoleFilter {
    pub fn new(console_error_patterns: &[String], ignored_stderr_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            console_errors: compile(console_error_patterns)?,
            ignored_stderr: compile(ignored_stderr_patterns)?,
        })
    }

    pub fn from_config(config: &WorkerPoolConfig) -> Result<Self> {
        Self::new(&config.console_error_patterns, &config.ignored_stderr_patterns)
    }

    /// A stdout line that reports an error even though the tool may still exit 0.
    pub fn is_console_error(&self, line: &str) -> bool {
        self.console_errors.iter().any(|re| re.is_match(line))
    }

    /// Whether a stderr line should fail the unit.
    pub fn is_significant_stderr(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        !self.ignored_stderr.iter().any(|re| re.is_match(line))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("Invalid console pattern: {}", p)))
        .collect()
}
