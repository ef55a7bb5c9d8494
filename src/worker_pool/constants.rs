use crate::constants::SECONDS_PER_DAY;

pub const DEFAULT_MAX_THREADS: usize = 4;
pub const MIN_MAX_THREADS: usize = 1;
pub const MAX_MAX_THREADS: usize = 64;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 50;

// Ceiling against runaway tools, not a tuned value
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 14 * SECONDS_PER_DAY;
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 14 * SECONDS_PER_DAY;

pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_PROGRESS_PATTERN: &str = r"(\d+)\s*/\s*(\d+)";

pub const DEFAULT_CONSOLE_ERROR_PATTERNS: &[&str] = &[r"^\s*Exception", r"^\s*(?i:error)\b"];
pub const DEFAULT_IGNORED_STDERR_PATTERNS: &[&str] = &[r"^\s*Picked up _?JAVA_OPTIONS"];
