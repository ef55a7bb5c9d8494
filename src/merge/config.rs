use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::merge::key::DelimitedHeaderKey;

/// What to do when a block header yields no key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedKeyPolicy {
    /// Take the source out of the ordered merge and copy the malformed block
    /// and everything after it to the end of the output.
    #[default]
    AppendUnordered,
    /// Stop the merge with an error.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Line written after every block.
    pub separator: String,
    pub malformed_key_policy: MalformedKeyPolicy,
    pub io_buffer_size_kb: usize,
    pub header_prefix: String,
    pub delimiter: char,
    pub scan_column: usize,
    pub charge_column: Option<usize>,
    /// Suffix used to pick per-worker result files out of a directory.
    pub input_suffix: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_BLOCK_SEPARATOR.to_string(),
            malformed_key_policy: MalformedKeyPolicy::default(),
            io_buffer_size_kb: DEFAULT_IO_BUFFER_SIZE_KB,
            header_prefix: DEFAULT_HEADER_PREFIX.to_string(),
            delimiter: DEFAULT_HEADER_DELIMITER,
            scan_column: 1,
            charge_column: Some(2),
            input_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.io_buffer_size_kb < MIN_IO_BUFFER_SIZE_KB || self.io_buffer_size_kb > MAX_IO_BUFFER_SIZE_KB {
            return Err(anyhow::anyhow!(
                "Merge I/O buffer size must be between {} and {} KB",
                MIN_IO_BUFFER_SIZE_KB, MAX_IO_BUFFER_SIZE_KB
            ));
        }

        if self.header_prefix.is_empty() {
            return Err(anyhow::anyhow!("Merge header prefix cannot be empty"));
        }

        if self.charge_column == Some(self.scan_column) {
            return Err(anyhow::anyhow!(
                "Scan and charge columns must differ (both are {})",
                self.scan_column
            ));
        }

        if self.separator.contains('\n') {
            return Err(anyhow::anyhow!("Block separator must be a single line"));
        }

        Ok(())
    }

    pub fn key_extractor(&self) -> DelimitedHeaderKey {
        DelimitedHeaderKey::new(
            self.header_prefix.clone(),
            self.delimiter,
            self.scan_column,
            self.charge_column,
        )
    }

    pub fn io_buffer_size(&self) -> usize {
        self.io_buffer_size_kb * BYTES_PER_KB
    }
}
