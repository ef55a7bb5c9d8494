// Worker pool for external tool processes
pub mod worker_pool;

// Recombining per-worker results
pub mod merge;

// Split / run / combine orchestration
pub mod pipeline;

pub mod config;
pub mod constants;
pub mod utils;

// Re-export main types for convenience
pub use config::Config;
pub use merge::{MalformedKeyPolicy, MergeConfig, MergeKey, MergeStats, OrderedStreamMerge};
pub use pipeline::{JobError, JobStats, MergeMode, ParallelToolJob};
pub use worker_pool::{AbortSignal, PoolOutcome, WorkUnit, WorkerPool, WorkerPoolConfig};
