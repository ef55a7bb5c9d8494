use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::process::Command;

use crate::worker_pool::{
    AbortSignal, PoolFailure, Progress, WorkUnit, WorkerError, WorkerPool, WorkerPoolConfig,
    WorkerState,
};

fn fast_config(max_threads: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        max_threads,
        poll_interval_ms: 100,
        timeout_seconds: 60,
        ..Default::default()
    }
}

fn units(dir: &std::path::Path, count: usize) -> Vec<WorkUnit> {
    (1..=count)
        .map(|index| {
            WorkUnit::new(
                index,
                dir.join(format!("scans_Part{}.mgf", index)),
                dir.join(format!("scans_Part{}_results.txt", index)),
            )
        })
        .collect()
}

/// Launcher running `script(index)` through `sh -c`, with the output path as `$1`.
fn shell(script: impl Fn(usize) -> String + Send + Sync + 'static) -> impl Fn(&WorkUnit) -> anyhow::Result<Command> + Send + Sync {
    move |unit: &WorkUnit| {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script(unit.index))
            .arg("sh")
            .arg(&unit.output_path);
        Ok(cmd)
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_all_units_succeed() {
    let dir = tempdir().unwrap();
    let pool = WorkerPool::new(
        fast_config(4),
        shell(|index| format!("echo 1/2; echo result {} > \"$1\"; echo 2/2", index)),
    )
    .unwrap();

    let outcome = pool.run(units(dir.path(), 4)).await.unwrap();

    assert!(outcome.success(), "unexpected failure: {:?}", outcome.first_error());
    assert_eq!(outcome.overall_progress, 100.0);
    assert_eq!(outcome.output_files().len(), 4);
    for (position, report) in outcome.reports.iter().enumerate() {
        assert_eq!(report.index, position + 1);
        assert_eq!(report.state, WorkerState::Success);
        assert_eq!(report.exit_code, Some(0));
        assert!(report.pid.is_some());
    }

    let third = std::fs::read_to_string(&outcome.output_files()[2]).unwrap();
    assert_eq!(third.trim(), "result 3");

    let console = std::fs::read_to_string(&outcome.reports[0].console_output_path).unwrap();
    assert_eq!(console, "1/2\n2/2\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_crashing_unit_fails_pool() {
    let dir = tempdir().unwrap();
    let pool = WorkerPool::new(
        fast_config(4),
        shell(|index| if index == 3 { "exit 1".to_string() } else { "true".to_string() }),
    )
    .unwrap();

    let outcome = pool.run(units(dir.path(), 4)).await.unwrap();

    assert!(!outcome.success());
    assert!(outcome.output_files().is_empty());
    let message = outcome.first_error().unwrap();
    assert!(message.contains("thread 3"), "message was: {}", message);
    assert_eq!(
        outcome.failure,
        Some(PoolFailure::Worker(WorkerError::NonZeroExit { index: 3, code: Some(1) }))
    );

    // Without fail_fast the other units still run to completion
    let succeeded = outcome
        .reports
        .iter()
        .filter(|r| r.state == WorkerState::Success)
        .count();
    assert_eq!(succeeded, 3);
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_aborts_running_workers() {
    let dir = tempdir().unwrap();
    let config = WorkerPoolConfig {
        timeout_seconds: 2,
        ..fast_config(2)
    };
    let pool = WorkerPool::new(config, shell(|_| "exec sleep 10".to_string())).unwrap();

    let started = Instant::now();
    let outcome = pool.run(units(dir.path(), 2)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(!outcome.success());
    assert!(matches!(outcome.failure, Some(PoolFailure::TimedOut { running: 2, .. })));
    assert!(elapsed < Duration::from_secs(8), "took {:?}", elapsed);
    assert!(outcome
        .reports
        .iter()
        .all(|r| r.error == Some(WorkerError::Aborted { index: r.index })));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stderr_fails_unit_unless_ignored() {
    let dir = tempdir().unwrap();
    let script = |_| "echo 'Picked up _JAVA_OPTIONS: -Xmx4G' >&2; echo 'warning: low memory' >&2".to_string();

    let pool = WorkerPool::new(fast_config(1), shell(script)).unwrap();
    let outcome = pool.run(units(dir.path(), 1)).await.unwrap();
    assert_eq!(
        outcome.failure,
        Some(PoolFailure::Worker(WorkerError::Stderr {
            index: 1,
            line: "warning: low memory".to_string()
        }))
    );

    let mut config = fast_config(1);
    config.ignored_stderr_patterns.push(r"^warning:".to_string());
    let pool = WorkerPool::new(config, shell(script)).unwrap();
    let outcome = pool.run(units(dir.path(), 1)).await.unwrap();
    assert!(outcome.success(), "unexpected failure: {:?}", outcome.first_error());
}

#[cfg(unix)]
#[tokio::test]
async fn test_console_error_fails_clean_exit() {
    let dir = tempdir().unwrap();
    let pool = WorkerPool::new(
        fast_config(1),
        shell(|_| "echo 'Exception in thread main: java.lang.OutOfMemoryError'; exit 0".to_string()),
    )
    .unwrap();

    let outcome = pool.run(units(dir.path(), 1)).await.unwrap();

    assert!(!outcome.success());
    assert!(matches!(
        outcome.failure,
        Some(PoolFailure::Worker(WorkerError::ConsoleError { index: 1, .. }))
    ));
    assert_eq!(outcome.reports[0].console_errors.len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_utf8_stderr_still_fails_unit() {
    let dir = tempdir().unwrap();
    let pool = WorkerPool::new(fast_config(1), shell(|_| r"printf 'fatal \377\n' >&2; exit 0".to_string())).unwrap();

    let outcome = pool.run(units(dir.path(), 1)).await.unwrap();

    assert_eq!(
        outcome.failure,
        Some(PoolFailure::Worker(WorkerError::Stderr {
            index: 1,
            line: "fatal \u{FFFD}".to_string()
        }))
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_utf8_stdout_keeps_draining() {
    let dir = tempdir().unwrap();
    let config = WorkerPoolConfig {
        timeout_seconds: 20,
        ..fast_config(1)
    };
    let script = r"printf 'scan \377\n'; head -c 400000 /dev/zero | tr '\0' a; echo; echo done; exit 0";
    let pool = WorkerPool::new(config, shell(move |_| script.to_string())).unwrap();

    let started = Instant::now();
    let outcome = pool.run(units(dir.path(), 1)).await.unwrap();

    assert!(outcome.success(), "unexpected failure: {:?}", outcome.first_error());
    assert!(started.elapsed() < Duration::from_secs(15), "took {:?}", started.elapsed());

    let console = std::fs::read_to_string(&outcome.reports[0].console_output_path).unwrap();
    assert!(console.starts_with("scan \u{FFFD}\n"));
    assert!(console.ends_with("done\n"));
    assert!(console.len() > 400_000);
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_executable_is_launch_failure() {
    let dir = tempdir().unwrap();
    let launcher = crate::worker_pool::ToolLauncher::new(dir.path().join("no-such-tool")).arg("{input}");
    let pool = WorkerPool::new(fast_config(2), launcher).unwrap();

    let outcome = pool.run(units(dir.path(), 3)).await.unwrap();

    assert!(!outcome.success());
    match outcome.failure {
        Some(PoolFailure::Worker(WorkerError::LaunchFailed { program, .. })) => {
            assert!(program.ends_with("no-such-tool"));
        }
        other => panic!("expected launch failure, got {:?}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_progress_is_parsed_and_reported() {
    let dir = tempdir().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();

    let pool = WorkerPool::new(
        fast_config(1),
        shell(|_| "echo 'Spectrum 3 of 4'; sleep 0.3; true".to_string()),
    )
    .unwrap()
    .with_progress_parser(|line: &str| {
        let rest = line.strip_prefix("Spectrum ")?;
        let (done, total) = rest.split_once(" of ")?;
        Some(Progress {
            completed: done.parse().ok()?,
            total: total.parse().ok()?,
        })
    })
    .with_progress_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = pool.run(units(dir.path(), 1)).await.unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.reports[0].progress, 100.0);
    // at least the final summary is published
    assert!(seen.load(Ordering::SeqCst) >= 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_more_units_than_threads() {
    let dir = tempdir().unwrap();
    let pool = WorkerPool::new(fast_config(2), shell(|_| "sleep 0.1".to_string())).unwrap();

    let outcome = pool.run(units(dir.path(), 5)).await.unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.reports.len(), 5);
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_abort_stops_pool() {
    let dir = tempdir().unwrap();
    let signal = AbortSignal::new();
    let pool = WorkerPool::new(fast_config(1), shell(|_| "exec sleep 10".to_string()))
        .unwrap()
        .with_abort_signal(signal.clone());

    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.abort();
    });

    let started = Instant::now();
    let outcome = pool.run(units(dir.path(), 3)).await.unwrap();

    assert_eq!(outcome.failure, Some(PoolFailure::Aborted));
    assert!(started.elapsed() < Duration::from_secs(5));
    // units 2 and 3 never got a slot
    assert!(outcome.reports.iter().all(|r| r.state == WorkerState::Failure));
}

#[tokio::test]
async fn test_invalid_units_are_rejected() {
    let pool = WorkerPool::new(fast_config(1), shell(|_| "true".to_string())).unwrap();
    assert!(pool.run(Vec::new()).await.is_err());

    let dir = tempdir().unwrap();
    let mut duplicated = units(dir.path(), 2);
    duplicated[1].index = 1;
    assert!(pool.run(duplicated).await.is_err());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = WorkerPoolConfig {
        max_threads: 0,
        ..Default::default()
    };
    assert!(WorkerPool::new(config, shell(|_| "true".to_string())).is_err());

    let config = WorkerPoolConfig {
        console_error_patterns: vec!["(unclosed".to_string()],
        ..Default::default()
    };
    assert!(WorkerPool::new(config, shell(|_| "true".to_string())).is_err());
}
