use anyhow::Context;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::merge::{assemble_files, AssembleStats, MergeStats, OrderedStreamMerge};
use crate::pipeline::config::MergeMode;
use crate::pipeline::error::JobError;
use crate::worker_pool::{
    split_into_partitions, AbortSignal, Launcher, PoolOutcome, ProgressParser, WorkUnit, WorkerPool,
};

#[derive(Debug, Clone)]
pub struct JobStats {
    pub input_records: usize,
    pub partitions: usize,
    /// Pool runs needed, 1 or 2.
    pub attempts: usize,
    pub pool_elapsed: Duration,
    pub merge: Option<MergeStats>,
    pub assemble: Option<AssembleStats>,
    pub output_path: PathBuf,
    pub intermediate_files_removed: usize,
    pub elapsed: Duration,
}

struct Processed {
    attempts: usize,
    pool_elapsed: Duration,
    merge: Option<MergeStats>,
    assemble: Option<AssembleStats>,
}

/// Split one input, run the tool on every part, and combine the results.
pub struct ParallelToolJob {
    config: Config,
    launcher: Arc<dyn Launcher>,
    parser: Arc<dyn ProgressParser>,
    abort_signal: Option<AbortSignal>,
}

impl ParallelToolJob {
    pub fn new(config: Config, launcher: impl Launcher + 'static) -> Result<Self, JobError> {
        config.validate().map_err(JobError::Config)?;
        let parser = config.tool.progress_parser().map_err(JobError::Config)?;

        Ok(Self {
            config,
            launcher: Arc::new(launcher),
            parser,
            abort_signal: None,
        })
    }

    /// Job driven entirely by the `tool` section of the config.
    pub fn from_config(config: Config) -> Result<Self, JobError> {
        config.tool.validate().map_err(JobError::Config)?;
        let launcher = config.tool.launcher();
        Self::new(config, launcher)
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    pub fn with_progress_parser(mut self, parser: impl ProgressParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&self, input: &Path, output: &Path) -> Result<JobStats, JobError> {
        let start_time = Instant::now();
        let job = &self.config.job;
        let work_dir = job.work_dir_for(output);

        info!("Processing {} with {} partitions", input.display(), job.partitions);

        let partitioning = {
            let source = input.to_path_buf();
            let marker = job.partition_marker.clone();
            let parts = job.partitions;
            let out_dir = work_dir.clone();
            tokio::task::spawn_blocking(move || split_into_partitions(&source, &marker, parts, &out_dir))
                .await
                .context("Partitioning task failed")?
                .map_err(|e| JobError::Partition {
                    input: input.to_path_buf(),
                    message: format!("{:#}", e),
                })?
        };

        let units: Vec<WorkUnit> = partitioning
            .parts
            .iter()
            .enumerate()
            .map(|(i, part)| WorkUnit::for_partition(i + 1, part, &work_dir, &job.output_suffix))
            .collect();

        // Intermediate files go on every exit path once the parts exist
        let processed = self.process_parts(&units, output).await;
        let intermediate_files_removed = self.cleanup(&partitioning.parts, &units);
        let Processed {
            attempts,
            pool_elapsed,
            merge,
            assemble,
        } = processed?;

        let stats = JobStats {
            input_records: partitioning.records,
            partitions: units.len(),
            attempts,
            pool_elapsed,
            merge,
            assemble,
            output_path: output.to_path_buf(),
            intermediate_files_removed,
            elapsed: start_time.elapsed(),
        };

        info!(
            "Job finished in {:.1}s: {} records, {} partitions, {} attempt(s)",
            stats.elapsed.as_secs_f64(),
            stats.input_records,
            stats.partitions,
            stats.attempts
        );
        Ok(stats)
    }

    /// Runs the pool over the parts, retrying once when configured, then combines the outputs.
    async fn process_parts(&self, units: &[WorkUnit], output: &Path) -> Result<Processed, JobError> {
        let job = &self.config.job;
        let mut pool = WorkerPool::with_shared_launcher(self.config.pool.clone(), self.launcher.clone())?
            .with_shared_progress_parser(self.parser.clone());
        if let Some(signal) = &self.abort_signal {
            pool = pool.with_abort_signal(signal.clone());
        }

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let outcome = pool.run(units.to_vec()).await?;
            if outcome.success() {
                break outcome;
            }

            let message = outcome.first_error().unwrap_or_default();
            let aborted = self.abort_signal.as_ref().is_some_and(|s| s.is_aborted());
            if job.retry_once && attempts == 1 && !aborted {
                warn!("Tool run failed ({}); retrying once", message);
                remove_files(&outcome.reports.iter().map(|r| r.output_path.clone()).collect::<Vec<_>>());
                continue;
            }

            return Err(JobError::PoolFailed { message, attempts });
        };

        let (merge, assemble) = self.combine(&outcome, output).await?;
        Ok(Processed {
            attempts,
            pool_elapsed: outcome.elapsed,
            merge,
            assemble,
        })
    }

    async fn combine(
        &self,
        outcome: &PoolOutcome,
        output: &Path,
    ) -> Result<(Option<MergeStats>, Option<AssembleStats>), JobError> {
        let inputs = outcome.output_files();
        let output = output.to_path_buf();

        match self.config.job.merge_mode {
            MergeMode::Ordered => {
                let merger = OrderedStreamMerge::new(self.config.merge.clone())?;
                let stats = tokio::task::spawn_blocking(move || merger.merge_files(&inputs, &output))
                    .await
                    .context("Merge task failed")??;
                Ok((Some(stats), None))
            }
            MergeMode::Concatenate { header_lines } => {
                let stats = tokio::task::spawn_blocking(move || assemble_files(&inputs, &output, header_lines))
                    .await
                    .context("Assemble task failed")??;
                Ok((None, Some(stats)))
            }
        }
    }

    /// Removes partitions, per-unit outputs and console captures unless the
    /// config asks to keep them. Returns the number of files removed.
    fn cleanup(&self, parts: &[PathBuf], units: &[WorkUnit]) -> usize {
        if self.config.job.keep_intermediate_files {
            info!("Keeping {} partitions and their tool outputs", parts.len());
            return 0;
        }

        let mut files: Vec<PathBuf> = parts.to_vec();
        for unit in units {
            files.push(unit.output_path.clone());
            files.push(unit.console_output_path.clone());
        }
        let removed = remove_files(&files);

        let dirs: std::collections::BTreeSet<&Path> = files.iter().filter_map(|f| f.parent()).collect();
        for dir in dirs {
            // Only succeeds when nothing else lives there
            match std::fs::remove_dir(dir) {
                Ok(()) => debug!("Removed work directory {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {}
                Err(e) => debug!("Could not remove {}: {}", dir.display(), e),
            }
        }

        debug!("Removed {} intermediate files", removed);
        removed
    }
}

fn remove_files(files: &[PathBuf]) -> usize {
    files
        .par_iter()
        .filter(|file| file.exists())
        .map(|file| match std::fs::remove_file(file) {
            Ok(()) => 1,
            Err(e) => {
                warn!("Failed to remove {}: {}", file.display(), e);
                0
            }
        })
        .sum()
}
