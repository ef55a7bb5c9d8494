use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::worker_pool::abort::AbortSignal;
use crate::worker_pool::config::WorkerPoolConfig;
use crate::worker_pool::console::ConsoleFilter;
use crate::worker_pool::constants::GRACEFUL_SHUTDOWN_TIMEOUT_MS;
use crate::worker_pool::error::{PoolFailure, WorkerError};
use crate::worker_pool::launcher::Launcher;
use crate::worker_pool::progress::{ProgressParser, RatioProgressParser};
use crate::worker_pool::status::{PoolProgress, WorkerSnapshot, WorkerState, WorkerStatus};
use crate::worker_pool::work_unit::WorkUnit;
use crate::worker_pool::worker::{WorkerContext, WorkerReport};

pub type ProgressCallback = Arc<dyn Fn(&PoolProgress) + Send + Sync>;

/// Result of one pool run. All-or-nothing: outputs are only handed out when
/// every unit succeeded.
#[derive(Debug, Clone)]
pub struct PoolOutcome {
    /// One report per unit, ordered by unit index.
    pub reports: Vec<WorkerReport>,
    pub overall_progress: f32,
    pub elapsed: Duration,
    pub failure: Option<PoolFailure>,
}

impl PoolOutcome {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn first_error(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }

    pub fn output_files(&self) -> Vec<PathBuf> {
        if !self.success() {
            return Vec::new();
        }
        self.reports.iter().map(|r| r.output_path.clone()).collect()
    }

    /// Console captures are left on disk either way; removing them is up to the caller.
    pub fn console_output_files(&self) -> Vec<PathBuf> {
        self.reports.iter().map(|r| r.console_output_path.clone()).collect()
    }

    pub fn worker_errors(&self) -> Vec<&WorkerError> {
        self.reports.iter().filter_map(|r| r.error.as_ref()).collect()
    }
}

/// Runs one external process per work unit with bounded parallelism.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    launcher: Arc<dyn Launcher>,
    parser: Arc<dyn ProgressParser>,
    filter: Arc<ConsoleFilter>,
    abort_signal: Option<AbortSignal>,
    progress_callback: Option<ProgressCallback>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, launcher: impl Launcher + 'static) -> Result<Self> {
        Self::with_shared_launcher(config, Arc::new(launcher))
    }

    pub fn with_shared_launcher(config: WorkerPoolConfig, launcher: Arc<dyn Launcher>) -> Result<Self> {
        config.validate()?;
        let filter = ConsoleFilter::from_config(&config)?;

        Ok(Self {
            config,
            launcher,
            parser: Arc::new(RatioProgressParser::standard()?),
            filter: Arc::new(filter),
            abort_signal: None,
            progress_callback: None,
        })
    }

    pub fn with_progress_parser(mut self, parser: impl ProgressParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn with_shared_progress_parser(mut self, parser: Arc<dyn ProgressParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    pub fn with_progress_callback(mut self, callback: impl Fn(&PoolProgress) + Send + Sync + 'static) -> Self {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub async fn run(&self, mut units: Vec<WorkUnit>) -> Result<PoolOutcome> {
        validate_units(&mut units)?;

        let unit_count = units.len();
        let started = Instant::now();
        let timeout = self.config.timeout();
        let poll_interval = self.config.poll_interval();
        let deadline = tokio::time::Instant::now() + timeout;
        let grace = Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS);

        let units: Vec<Arc<WorkUnit>> = units.into_iter().map(Arc::new).collect();
        let statuses: Vec<Arc<WorkerStatus>> = units
            .iter()
            .map(|unit| Arc::new(WorkerStatus::new(unit.index)))
            .collect();

        info!(
            "Starting worker pool: {} units, up to {} concurrent, timeout {}s",
            unit_count, self.config.max_threads, self.config.timeout_seconds
        );

        let abort = AbortSignal::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_threads));
        let mut tasks = JoinSet::new();

        for (unit, status) in units.iter().zip(statuses.iter()) {
            let ctx = WorkerContext {
                unit: unit.clone(),
                status: status.clone(),
                launcher: self.launcher.clone(),
                parser: self.parser.clone(),
                filter: self.filter.clone(),
                abort: abort.clone(),
                sample_interval: poll_interval,
            };
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = ctx.abort.aborted() => None,
                };
                match permit {
                    Some(_permit) => ctx.run().await,
                    None => ctx.aborted_before_start(),
                }
            });
        }

        let external_abort = self.abort_signal.clone().unwrap_or_default();
        let mut reports: Vec<Option<WorkerReport>> = (0..unit_count).map(|_| None).collect();
        let mut failure: Option<PoolFailure> = None;
        let mut grace_deadline: Option<tokio::time::Instant> = None;
        let mut task_panicked = false;

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(report)) => {
                        if let Some(error) = &report.error {
                            if failure.is_none() {
                                failure = Some(PoolFailure::Worker(error.clone()));
                            }
                            if (error.is_fatal() || self.config.fail_fast) && !abort.is_aborted() {
                                error!("Stopping worker pool after failure: {}", error);
                                abort.abort();
                                grace_deadline = Some(tokio::time::Instant::now() + grace);
                            }
                        }
                        let slot = report.index - 1;
                        reports[slot] = Some(report);
                    }
                    Some(Err(join_error)) => {
                        if join_error.is_panic() {
                            error!("Worker task panicked: {}", join_error);
                            task_panicked = true;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.publish_progress(&statuses, started);
                },
                _ = tokio::time::sleep_until(deadline), if !abort.is_aborted() => {
                    let running = statuses.iter().filter(|s| !s.state().is_terminal()).count();
                    warn!(
                        "Worker pool exceeded timeout of {}s with {} workers unfinished; aborting",
                        timeout.as_secs(),
                        running
                    );
                    failure.get_or_insert(PoolFailure::TimedOut { timeout, running });
                    abort.abort();
                    grace_deadline = Some(tokio::time::Instant::now() + grace);
                },
                _ = external_abort.aborted(), if !abort.is_aborted() => {
                    warn!("Abort requested; stopping all workers");
                    failure.get_or_insert(PoolFailure::Aborted);
                    abort.abort();
                    grace_deadline = Some(tokio::time::Instant::now() + grace);
                },
                _ = sleep_until_opt(grace_deadline), if grace_deadline.is_some() => {
                    error!("{} workers did not stop within {}ms; cancelling their tasks", tasks.len(), grace.as_millis());
                    tasks.abort_all();
                    grace_deadline = None;
                },
            }
        }

        let reports: Vec<WorkerReport> = reports
            .into_iter()
            .enumerate()
            .map(|(slot, report)| {
                report.unwrap_or_else(|| {
                    let index = units[slot].index;
                    let error = if task_panicked && !abort.is_aborted() {
                        WorkerError::Panicked { index }
                    } else {
                        WorkerError::Aborted { index }
                    };
                    WorkerReport::missing(&units[slot], &statuses[slot], error)
                })
            })
            .collect();

        if failure.is_none() {
            if let Some(report) = reports.iter().find(|r| r.state != WorkerState::Success || r.error.is_some()) {
                let error = report
                    .error
                    .clone()
                    .unwrap_or(WorkerError::Panicked { index: report.index });
                failure = Some(PoolFailure::Worker(error));
            }
        }

        let final_progress = self.publish_progress(&statuses, started);
        let overall_progress = if reports.is_empty() {
            0.0
        } else {
            reports.iter().map(|r| r.progress).sum::<f32>() / reports.len() as f32
        };

        let outcome = PoolOutcome {
            reports,
            overall_progress,
            elapsed: started.elapsed(),
            failure,
        };

        match &outcome.failure {
            None => info!(
                "Worker pool finished: {} units succeeded in {:.1}s",
                unit_count,
                outcome.elapsed.as_secs_f64()
            ),
            Some(failure) => warn!(
                "Worker pool failed after {:.1}s ({} succeeded, {} failed): {}",
                outcome.elapsed.as_secs_f64(),
                final_progress.succeeded,
                unit_count - final_progress.succeeded,
                failure
            ),
        }

        Ok(outcome)
    }

    fn publish_progress(&self, statuses: &[Arc<WorkerStatus>], started: Instant) -> PoolProgress {
        let snapshots: Vec<WorkerSnapshot> = statuses.iter().map(|s| s.snapshot()).collect();
        let progress = PoolProgress::from_snapshots(&snapshots);

        debug!(
            overall_percent = progress.overall_percent,
            cpu_percent = progress.total_cpu_usage,
            running = progress.running,
            waiting = progress.not_started,
            succeeded = progress.succeeded,
            failed = progress.failed,
            elapsed_s = started.elapsed().as_secs(),
            "Worker pool progress"
        );

        if let Some(callback) = &self.progress_callback {
            callback(&progress);
        }
        progress
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Units must be numbered 1..=K without gaps and must not share output paths.
fn validate_units(units: &mut [WorkUnit]) -> Result<()> {
    if units.is_empty() {
        return Err(anyhow::anyhow!("Worker pool needs at least one work unit"));
    }

    units.sort_by_key(|unit| unit.index);
    for (position, unit) in units.iter().enumerate() {
        if unit.index != position + 1 {
            return Err(anyhow::anyhow!(
                "Work unit indices must run from 1 to {} without gaps or duplicates (found {} at position {})",
                units.len(),
                unit.index,
                position + 1
            ));
        }
    }

    let mut paths = HashSet::new();
    for unit in units.iter() {
        if !paths.insert(unit.output_path.clone()) || !paths.insert(unit.console_output_path.clone()) {
            return Err(anyhow::anyhow!(
                "Work unit {} shares an output path with another unit",
                unit.index
            ));
        }
    }

    Ok(())
}
