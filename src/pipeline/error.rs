use std::path::PathBuf;
use thiserror::Error;

use crate::merge::MergeError;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("failed to partition {}: {message}", .input.display())]
    Partition { input: PathBuf, message: String },

    #[error("tool run failed after {attempts} attempt(s): {message}")]
    PoolFailed { message: String, attempts: usize },

    #[error("failed to combine results: {0}")]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
