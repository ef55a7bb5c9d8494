//! Bounded fan-out of external tool processes.
//!
//! One work unit per input partition, one process per unit, at most
//! `max_threads` processes alive at a time. The pool succeeds only when
//! every unit succeeds.

pub mod abort;
pub mod config;
pub mod console;
pub mod constants;
pub mod error;
pub mod launcher;
pub mod partition;
pub mod pool;
pub mod progress;
pub mod status;
pub mod work_unit;
pub mod worker;

#[cfg(test)]
mod tests;

pub use abort::AbortSignal;
pub use config::WorkerPoolConfig;
pub use console::ConsoleFilter;
pub use error::{PoolFailure, WorkerError};
pub use launcher::{Launcher, ToolLauncher};
pub use partition::{split_into_partitions, Partitioning};
pub use pool::{PoolOutcome, WorkerPool};
pub use progress::{NoProgress, Progress, ProgressParser, RatioProgressParser};
pub use status::{PoolProgress, WorkerSnapshot, WorkerState, WorkerStatus};
pub use work_unit::WorkUnit;
pub use worker::WorkerReport;
