//! Split → run → combine → clean up, for one input file.

pub mod config;
pub mod error;
pub mod job;


pub use config::{JobConfig, MergeMode, ToolConfig};
pub use error::JobError;
pub use job::{JobStats, ParallelToolJob};
