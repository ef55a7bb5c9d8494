use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("source {source_index}: malformed block header at line {line_number}: {header}")]
    MalformedKey {
        source_index: usize,
        line_number: usize,
        header: String,
    },

    #[error("merge input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("merge needs at least one input")]
    NoInputs,

    #[error("I/O error during merge: {0}")]
    Io(#[from] std::io::Error),
}

pub type MergeResult<T> = std::result::Result<T, MergeError>;
