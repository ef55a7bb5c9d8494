use std::time::Duration;
use thiserror::Error;

/// Why a single work unit failed. Every variant names its unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("thread {index}: failed to launch {program}: {message}")]
    LaunchFailed { index: usize, program: String, message: String },

    #[error("thread {index}: process exited with {}", exit_code_text(.code))]
    NonZeroExit { index: usize, code: Option<i32> },

    #[error("thread {index}: process wrote to stderr: {line}")]
    Stderr { index: usize, line: String },

    #[error("thread {index}: console output reported an error: {line}")]
    ConsoleError { index: usize, line: String },

    #[error("thread {index}: I/O error: {message}")]
    Io { index: usize, message: String },

    #[error("thread {index}: aborted")]
    Aborted { index: usize },

    #[error("thread {index}: worker task panicked")]
    Panicked { index: usize },
}

impl WorkerError {
    pub fn index(&self) -> usize {
        match self {
            WorkerError::LaunchFailed { index, .. }
            | WorkerError::NonZeroExit { index, .. }
            | WorkerError::Stderr { index, .. }
            | WorkerError::ConsoleError { index, .. }
            | WorkerError::Io { index, .. }
            | WorkerError::Aborted { index }
            | WorkerError::Panicked { index } => *index,
        }
    }

    /// Launch failures stop the whole pool immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::LaunchFailed { .. })
    }
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Why the pool as a whole failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolFailure {
    #[error("{0}")]
    Worker(WorkerError),

    #[error("worker pool exceeded its timeout of {}s; aborted {running} unfinished workers", .timeout.as_secs())]
    TimedOut { timeout: Duration, running: usize },

    #[error("worker pool aborted by caller")]
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_thread() {
        let err = WorkerError::NonZeroExit { index: 3, code: Some(1) };
        assert_eq!(err.to_string(), "thread 3: process exited with exit code 1");
        assert_eq!(err.index(), 3);
        assert!(!err.is_fatal());

        let err = WorkerError::NonZeroExit { index: 2, code: None };
        assert!(err.to_string().contains("terminated by signal"));

        let err = WorkerError::LaunchFailed {
            index: 1,
            program: "MODPlus".into(),
            message: "No such file or directory".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("thread 1: failed to launch MODPlus"));
    }

    #[test]
    fn test_pool_failure_display() {
        let failure = PoolFailure::Worker(WorkerError::Aborted { index: 4 });
        assert_eq!(failure.to_string(), "thread 4: aborted");

        let failure = PoolFailure::TimedOut { timeout: Duration::from_secs(2), running: 1 };
        assert!(failure.to_string().contains("timeout of 2s"));
    }
}
