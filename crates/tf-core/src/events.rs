//! Structured progress events emitted by background jobs.
//!
//! Jobs run off the host thread and cannot touch host state directly, so
//! everything they want to say is expressed as a [`JobEvent`] and handed to
//! the host through a bounded channel the host drains on its own schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, TaskId};
use crate::status::{JobState, JobStatus};

/// Final tally of a job, delivered once it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub state: JobState,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub elapsed_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&JobStatus> for JobSummary {
    fn from(status: &JobStatus) -> Self {
        Self {
            state: status.state,
            succeeded: status.succeeded,
            failed: status.failed,
            skipped: status.skipped,
            total: status.total,
            elapsed_secs: status.elapsed_secs,
            error: status.error.clone(),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Started {
        total: usize,
    },
    Progress {
        completed: usize,
        total: usize,
        percent: f32,
    },
    TaskDone {
        task_id: TaskId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GroupFailed {
        reason: String,
    },
    JobDone(JobSummary),
}

/// A timestamped event for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub kind: JobEventKind,
}

impl JobEvent {
    /// Create a new event stamped with the current time.
    pub fn new(job_id: JobId, kind: JobEventKind) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Whether this is the last event a job will emit.
    pub fn is_final(&self) -> bool {
        matches!(self.kind, JobEventKind::JobDone(_))
    }

    /// One-line human-readable rendering, used for logs and the job's
    /// `last_message`.
    pub fn describe(&self) -> String {
        match &self.kind {
            JobEventKind::Started { total } => format!("Started processing {total} textures"),
            JobEventKind::Progress {
                completed,
                total,
                percent,
            } => format!("Processed {completed}/{total} textures ({percent:.0}%)"),
            JobEventKind::TaskDone {
                task_id,
                success: true,
                ..
            } => format!("Task {task_id} converted"),
            JobEventKind::TaskDone {
                task_id,
                success: false,
                error,
            } => format!(
                "Task {task_id} failed: {}",
                error.as_deref().unwrap_or("unknown error")
            ),
            JobEventKind::GroupFailed { reason } => format!("Conversion group failed: {reason}"),
            JobEventKind::JobDone(summary) => format!(
                "Job {}: {}/{} successful, {} failed, {} skipped",
                summary.state, summary.succeeded, summary.total, summary.failed, summary.skipped
            ),
        }
    }
}
