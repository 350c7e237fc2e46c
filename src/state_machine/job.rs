use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::tab::Composition;

/// Lifecycle status of a transcription job.
///
/// Jobs flow PENDING → PROCESSING → {COMPLETED, FAILED}. A pending job may
/// also fail directly if its worker cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self → next` is a legal move. Terminal states admit none.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One submitted document and everything known about its processing.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    status: JobStatus,
    status_history: Vec<JobStatus>,
    pub progress: String,
    pub pages_total: usize,
    pub pages_completed: usize,
    pub result: Option<Composition>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(input_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: new_job_id(),
            input_path: input_path.into(),
            output_dir: output_dir.into(),
            status: JobStatus::Pending,
            status_history: Vec::new(),
            progress: String::new(),
            pages_total: 0,
            pages_completed: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Statuses this job has left, oldest first.
    pub fn status_history(&self) -> &[JobStatus] {
        &self.status_history
    }

    /// Moves the job to `next`, refusing anything but a forward transition.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status_history.push(self.status);
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Fails the job unless it already reached a terminal state.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.transition(JobStatus::Failed).is_ok() {
            self.error = Some(message.into());
        }
    }

    pub fn set_progress(&mut self, progress: impl Into<String>) {
        self.progress = progress.into();
        self.updated_at = Utc::now();
    }

    /// Records one more processed page, never exceeding `pages_total`.
    pub fn complete_page(&mut self) {
        self.pages_completed = (self.pages_completed + 1).min(self.pages_total);
        self.updated_at = Utc::now();
    }

    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress.clone(),
            pages_total: self.pages_total,
            pages_completed: self.pages_completed,
            error: self.error.clone(),
        }
    }
}

/// Short job identifier: the first 12 hex digits of a v4 UUID.
fn new_job_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// What a status query returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: String,
    pub pages_total: usize,
    pub pages_completed: usize,
    pub error: Option<String>,
}
