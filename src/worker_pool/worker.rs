use chrono::Utc;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::constants::PERCENT_100;
use crate::worker_pool::abort::AbortSignal;
use crate::worker_pool::console::ConsoleFilter;
use crate::worker_pool::constants::GRACEFUL_SHUTDOWN_TIMEOUT_MS;
use crate::worker_pool::error::WorkerError;
use crate::worker_pool::launcher::Launcher;
use crate::worker_pool::progress::ProgressParser;
use crate::worker_pool::status::{WorkerState, WorkerStatus};
use crate::worker_pool::work_unit::WorkUnit;

/// Final record of one work unit, returned to the coordinator.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub index: usize,
    pub state: WorkerState,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub progress: f32,
    pub cpu_usage: f32,
    pub output_path: PathBuf,
    pub console_output_path: PathBuf,
    pub console_errors: Vec<String>,
    pub elapsed: Duration,
    pub error: Option<WorkerError>,
}

impl WorkerReport {
    /// Report for a unit whose task ended without producing one.
    pub(crate) fn missing(unit: &WorkUnit, status: &WorkerStatus, error: WorkerError) -> Self {
        Self {
            index: unit.index,
            state: WorkerState::Failure,
            exit_code: None,
            pid: status.pid(),
            progress: status.progress(),
            cpu_usage: status.cpu_usage(),
            output_path: unit.output_path.clone(),
            console_output_path: unit.console_output_path.clone(),
            console_errors: Vec::new(),
            elapsed: Duration::ZERO,
            error: Some(error),
        }
    }
}

struct Execution {
    exit_code: Option<i32>,
    console_errors: Vec<String>,
    error: Option<WorkerError>,
}

#[derive(Default)]
struct Capture {
    stderr: Vec<String>,
    console_errors: Vec<String>,
}

pub(crate) struct WorkerContext {
    pub unit: Arc<WorkUnit>,
    pub status: Arc<WorkerStatus>,
    pub launcher: Arc<dyn Launcher>,
    pub parser: Arc<dyn ProgressParser>,
    pub filter: Arc<ConsoleFilter>,
    pub abort: AbortSignal,
    pub sample_interval: Duration,
}

impl WorkerContext {
    pub(crate) async fn run(self) -> WorkerReport {
        let started = Instant::now();
        let index = self.unit.index;

        let execution = match self.execute().await {
            Ok(execution) => execution,
            Err(error) => Execution {
                exit_code: None,
                console_errors: Vec::new(),
                error: Some(error),
            },
        };

        let success = execution.error.is_none();
        if success {
            self.status.set_progress(PERCENT_100);
        }
        self.status.finish(success);

        match &execution.error {
            Some(error) => {
                warn!(thread = index, "{}", error);
                self.status.set_last_message(&error.to_string());
            }
            None => info!(
                thread = index,
                elapsed_s = started.elapsed().as_secs_f64(),
                "Worker finished successfully"
            ),
        }

        self.report(execution, started.elapsed())
    }

    /// Unit that never got a slot before the pool was aborted.
    pub(crate) fn aborted_before_start(self) -> WorkerReport {
        let error = WorkerError::Aborted { index: self.unit.index };
        self.status.finish(false);
        debug!(thread = self.unit.index, "Aborted before start");
        WorkerReport::missing(&self.unit, &self.status, error)
    }

    async fn execute(&self) -> Result<Execution, WorkerError> {
        let unit = &self.unit;
        let index = unit.index;
        let launch_failed = |message: String| WorkerError::LaunchFailed {
            index,
            program: self.launcher.program_name(unit),
            message,
        };
        let io_err = |e: std::io::Error| WorkerError::Io {
            index,
            message: e.to_string(),
        };

        let mut cmd = self
            .launcher
            .command(unit)
            .map_err(|e| launch_failed(format!("{:#}", e)))?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| launch_failed(e.to_string()))?;
        let pid = child.id().unwrap_or(0);
        self.status.set_pid(pid);
        self.status.mark_running();
        info!(
            thread = index,
            pid,
            input = %unit.input_path.display(),
            "Launched worker process"
        );

        let stdout = child.stdout.take().ok_or_else(|| WorkerError::Io {
            index,
            message: "stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| WorkerError::Io {
            index,
            message: "stderr was not captured".to_string(),
        })?;

        if let Some(parent) = unit.console_output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut console = BufWriter::new(File::create(&unit.console_output_path).await.map_err(io_err)?);

        let mut stdout_lines = LossyLines::new(stdout);
        let mut stderr_lines = LossyLines::new(stderr);
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut capture = Capture::default();

        let mut sampler = CpuSampler::new(pid);
        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit_status: ExitStatus = loop {
            tokio::select! {
                line = stdout_lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => self.on_stdout(&line, &mut console, &mut capture).await.map_err(io_err)?,
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!(thread = index, "Stopped reading stdout: {}", e);
                        stdout_open = false;
                    }
                },
                line = stderr_lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => self.on_stderr(&line, &mut console, &mut capture).await.map_err(io_err)?,
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!(thread = index, "Stopped reading stderr: {}", e);
                        capture.stderr.push(format!("failed to read stderr: {}", e));
                        stderr_open = false;
                    }
                },
                status = child.wait() => break status.map_err(io_err)?,
                _ = ticker.tick() => {
                    if let Some(usage) = sampler.sample() {
                        self.status.set_cpu_usage(usage);
                    }
                },
                _ = self.abort.aborted() => {
                    warn!(thread = index, pid, "Abort requested, killing worker process");
                    if let Err(e) = child.kill().await {
                        warn!(thread = index, pid, "Failed to kill worker process: {}", e);
                    }
                    let _ = console.flush().await;
                    return Err(WorkerError::Aborted { index });
                },
            }
        };

        // The process is gone but its pipes may still hold buffered lines
        let drain = async {
            if stdout_open {
                drain_lines(&mut stdout_lines, |line| self.on_stdout_sync(line, &mut capture)).await
            } else {
                (Vec::new(), None)
            }
        };
        let grace = Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS);
        let (tail_stdout, stdout_error) = tokio::time::timeout(grace, drain).await.unwrap_or_default();
        let (tail_stderr, stderr_error) = if stderr_open {
            tokio::time::timeout(grace, drain_lines(&mut stderr_lines, |_| ()))
                .await
                .unwrap_or_default()
        } else {
            (Vec::new(), None)
        };
        if let Some(e) = stdout_error {
            warn!(thread = index, "Stopped reading stdout: {}", e);
        }

        for line in &tail_stdout {
            console.write_all(line.as_bytes()).await.map_err(io_err)?;
            console.write_all(b"\n").await.map_err(io_err)?;
        }
        for line in &tail_stderr {
            self.on_stderr(line, &mut console, &mut capture).await.map_err(io_err)?;
        }
        if let Some(e) = stderr_error {
            warn!(thread = index, "Stopped reading stderr: {}", e);
            capture.stderr.push(format!("failed to read stderr: {}", e));
        }
        console.flush().await.map_err(io_err)?;

        let exit_code = exit_status.code();
        let error = if !exit_status.success() {
            Some(WorkerError::NonZeroExit { index, code: exit_code })
        } else if let Some(line) = capture.stderr.first() {
            Some(WorkerError::Stderr { index, line: line.clone() })
        } else {
            capture
                .console_errors
                .first()
                .map(|line| WorkerError::ConsoleError { index, line: line.clone() })
        };

        Ok(Execution {
            exit_code,
            console_errors: capture.console_errors,
            error,
        })
    }

    async fn on_stdout(
        &self,
        line: &str,
        console: &mut BufWriter<File>,
        capture: &mut Capture,
    ) -> std::io::Result<()> {
        console.write_all(line.as_bytes()).await?;
        console.write_all(b"\n").await?;
        self.on_stdout_sync(line, capture);
        Ok(())
    }

    fn on_stdout_sync(&self, line: &str, capture: &mut Capture) {
        if let Some(progress) = self.parser.parse(line) {
            self.status.set_progress(progress.percent());
            self.status.touch_output(Utc::now());
        }

        if self.filter.is_console_error(line) {
            debug!(thread = self.unit.index, "Console error: {}", line);
            capture.console_errors.push(line.to_string());
        }

        if !line.trim().is_empty() {
            self.status.set_last_message(line);
        }
    }

    async fn on_stderr(
        &self,
        line: &str,
        console: &mut BufWriter<File>,
        capture: &mut Capture,
    ) -> std::io::Result<()> {
        console.write_all(line.as_bytes()).await?;
        console.write_all(b"\n").await?;

        if self.filter.is_significant_stderr(line) {
            debug!(thread = self.unit.index, "stderr: {}", line);
            capture.stderr.push(line.to_string());
        }
        Ok(())
    }

    fn report(&self, execution: Execution, elapsed: Duration) -> WorkerReport {
        WorkerReport {
            index: self.unit.index,
            state: self.status.state(),
            exit_code: execution.exit_code,
            pid: self.status.pid(),
            progress: self.status.progress(),
            cpu_usage: self.status.cpu_usage(),
            output_path: self.unit.output_path.clone(),
            console_output_path: self.unit.console_output_path.clone(),
            console_errors: execution.console_errors,
            elapsed,
            error: execution.error,
        }
    }
}

/// Line reader over a child pipe that decodes invalid UTF-8 lossily
/// instead of failing, so the pipe keeps draining.
struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Cancel safe: a partial line stays in `buf` until its newline arrives.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut end = self.buf.len();
        if self.buf.ends_with(b"\n") {
            end -= 1;
            if end > 0 && self.buf[end - 1] == b'\r' {
                end -= 1;
            }
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

async fn drain_lines<R, F>(lines: &mut LossyLines<R>, mut on_line: F) -> (Vec<String>, Option<std::io::Error>)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut drained = Vec::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                on_line(&line);
                drained.push(line);
            }
            Ok(None) => return (drained, None),
            Err(e) => return (drained, Some(e)),
        }
    }
}

/// Samples the CPU usage of one process id.
struct CpuSampler {
    system: System,
    pid: Option<Pid>,
}

impl CpuSampler {
    fn new(pid: u32) -> Self {
        Self {
            system: System::new(),
            pid: (pid != 0).then(|| Pid::from_u32(pid)),
        }
    }

    fn sample(&mut self) -> Option<f32> {
        let pid = self.pid?;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).map(|process| process.cpu_usage())
    }
}
