//! Job lifecycle and the re-entrancy lock.
//!
//! The lock *is* the job state: a job can start only when the state is not
//! in flight, and the check and the transition happen under one mutex.
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use uuid::Uuid;

use crate::sd::progress::ProgressSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    ModelSelecting,
    Submitting,
    Polling,
    Decoding,
    Completed,
    Failed,
}

impl JobState {
    /// In-flight states hold the re-entrancy lock.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::ModelSelecting | JobState::Submitting | JobState::Polling | JobState::Decoding
        )
    }
}

/// What observers (host UI, API) can see about the current or last job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Option<Uuid>,
    pub state: JobState,
    pub progress: f32,
    pub status: String,
    pub generated_seed: Option<i64>,
    pub output_path: Option<PathBuf>,
    pub last_error: Option<String>,
    pub warnings: Vec<String>,
}

impl Default for JobSnapshot {
    fn default() -> Self {
        JobSnapshot {
            job_id: None,
            state: JobState::Idle,
            progress: 0.0,
            status: String::new(),
            generated_seed: None,
            output_path: None,
            last_error: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct JobSlot {
    snapshot: Mutex<JobSnapshot>,
}

impl JobSlot {
    fn lock(&self) -> MutexGuard<'_, JobSnapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        self.lock().clone()
    }

    pub(crate) fn state(&self) -> JobState {
        self.lock().state
    }

    /// Compare-and-set `not active -> ModelSelecting`. Returns the guard that
    /// owns the lock, or `None` when a job is already in flight.
    pub(crate) fn try_begin(self: &Arc<Self>) -> Option<JobGuard> {
        let mut snap = self.lock();
        if snap.state.is_active() {
            return None;
        }
        let job_id = Uuid::new_v4();
        *snap = JobSnapshot {
            job_id: Some(job_id),
            state: JobState::ModelSelecting,
            status: "selecting model".to_string(),
            ..JobSnapshot::default()
        };
        Some(JobGuard { slot: self.clone(), job_id, finished: false })
    }
}

/// Owns the re-entrancy lock for one job. Dropping it without `complete`
/// or `fail` marks the job failed so the lock is never leaked.
pub struct JobGuard {
    slot: Arc<JobSlot>,
    job_id: Uuid,
    finished: bool,
}

impl JobGuard {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn transition(&self, state: JobState, status: &str) {
        let mut snap = self.slot.lock();
        tracing::debug!(job_id = %self.job_id, from = ?snap.state, to = ?state, "job transition");
        snap.state = state;
        snap.status = status.to_string();
    }

    pub fn warn(&self, message: String) {
        tracing::warn!(job_id = %self.job_id, "{}", message);
        self.slot.lock().warnings.push(message);
    }

    /// A handle the polling task uses to publish samples.
    pub(crate) fn reporter(&self) -> ProgressReporter {
        ProgressReporter { slot: self.slot.clone(), job_id: self.job_id }
    }

    pub fn complete(mut self, output_path: PathBuf, generated_seed: Option<i64>) {
        let mut snap = self.slot.lock();
        snap.state = JobState::Completed;
        snap.progress = 100.0;
        snap.status = "completed".to_string();
        snap.output_path = Some(output_path);
        snap.generated_seed = generated_seed;
        self.finished = true;
    }

    pub fn fail(mut self, error: &str) {
        let mut snap = self.slot.lock();
        snap.state = JobState::Failed;
        snap.status = "failed".to_string();
        snap.last_error = Some(error.to_string());
        self.finished = true;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut snap = self.slot.lock();
        if snap.job_id == Some(self.job_id) && snap.state.is_active() {
            snap.state = JobState::Failed;
            snap.status = "failed".to_string();
            snap.last_error = Some("job abandoned before completion".to_string());
        }
    }
}

/// Writes progress samples for one job. Samples arriving after the job has
/// left `Polling` are stale and dropped.
#[derive(Clone)]
pub(crate) struct ProgressReporter {
    slot: Arc<JobSlot>,
    job_id: Uuid,
}

impl ProgressReporter {
    pub(crate) fn report(&self, sample: &ProgressSample) -> bool {
        let mut snap = self.slot.lock();
        if snap.job_id != Some(self.job_id) || snap.state != JobState::Polling {
            return false;
        }
        snap.progress = sample.percent;
        snap.status = sample.status.clone();
        true
    }
}
