use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::constants::PERCENT_100;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    NotStarted = 0,
    Running = 1,
    Success = 2,
    Failure = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::NotStarted,
            1 => WorkerState::Running,
            2 => WorkerState::Success,
            _ => WorkerState::Failure,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Success | WorkerState::Failure)
    }
}

/// Live status of one work unit.
///
/// Written only by the task that owns the unit, read by the coordinator.
/// Scalar fields are single atomics so readers never see a torn value.
#[derive(Debug)]
pub struct WorkerStatus {
    index: usize,
    state: AtomicU8,
    progress_bits: AtomicU32,
    pid: AtomicU32,
    cpu_usage_bits: AtomicU32,
    last_output_ms: AtomicU64,
    last_message: Mutex<Option<String>>,
}

impl WorkerStatus {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: AtomicU8::new(WorkerState::NotStarted as u8),
            progress_bits: AtomicU32::new(0f32.to_bits()),
            pid: AtomicU32::new(0),
            cpu_usage_bits: AtomicU32::new(0f32.to_bits()),
            last_output_ms: AtomicU64::new(0),
            last_message: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// NotStarted -> Running. Returns false if the unit already left NotStarted.
    pub(crate) fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                WorkerState::NotStarted as u8,
                WorkerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to a terminal state. Terminal states are final.
    pub(crate) fn finish(&self, success: bool) -> bool {
        let target = if success { WorkerState::Success } else { WorkerState::Failure };
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if WorkerState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(target as u8)
                }
            })
            .is_ok()
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_progress(&self, percent: f32) {
        let clamped = if percent.is_finite() { percent.clamp(0.0, PERCENT_100) } else { 0.0 };
        self.progress_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub(crate) fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::Relaxed);
    }

    pub fn cpu_usage(&self) -> f32 {
        f32::from_bits(self.cpu_usage_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_cpu_usage(&self, usage: f32) {
        self.cpu_usage_bits.store(usage.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn last_output_time(&self) -> Option<DateTime<Utc>> {
        match self.last_output_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms as i64).single(),
        }
    }

    pub(crate) fn touch_output(&self, at: DateTime<Utc>) {
        self.last_output_ms.store(at.timestamp_millis().max(1) as u64, Ordering::Relaxed);
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().clone()
    }

    pub(crate) fn set_last_message(&self, message: &str) {
        *self.last_message.lock() = Some(message.to_string());
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            index: self.index,
            state: self.state(),
            progress: self.progress(),
            pid: self.pid(),
            cpu_usage: self.cpu_usage(),
            last_output: self.last_output_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub index: usize,
    pub state: WorkerState,
    pub progress: f32,
    pub pid: Option<u32>,
    pub cpu_usage: f32,
    pub last_output: Option<DateTime<Utc>>,
}

/// Pool-wide view computed by the coordinator on every poll.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolProgress {
    pub overall_percent: f32,
    pub total_cpu_usage: f32,
    pub not_started: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PoolProgress {
    pub fn from_snapshots(snapshots: &[WorkerSnapshot]) -> Self {
        let mut progress = PoolProgress::default();
        if snapshots.is_empty() {
            return progress;
        }

        let mut progress_sum = 0.0f32;
        for snapshot in snapshots {
            progress_sum += snapshot.progress;
            progress.total_cpu_usage += snapshot.cpu_usage;
            match snapshot.state {
                WorkerState::NotStarted => progress.not_started += 1,
                WorkerState::Running => progress.running += 1,
                WorkerState::Success => progress.succeeded += 1,
                WorkerState::Failure => progress.failed += 1,
            }
        }
        progress.overall_percent = progress_sum / snapshots.len() as f32;
        progress
    }
}
