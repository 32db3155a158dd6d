//! Task and job state machines plus the status snapshots handed to callers.
//!
//! Task states only move forward: `pending -> processing -> completed|failed`.
//! Job states follow `queued -> processing -> completed|failed|cancelled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::ids::{JobId, TaskId};
use crate::texture::{TargetEncoding, TextureCategory};

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Lifecycle state of a single conversion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Pending may jump straight to a terminal state (the converter being
    /// unavailable fails a task before it is ever processed).
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Processing => next.is_terminal(),
            Self::Completed | Self::Failed => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of a task, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub state: TaskState,
    /// Human-readable name of the source image.
    pub name: String,
    pub output_path: PathBuf,
    pub category: TextureCategory,
    /// Resolved encoding (explicit, or the category default).
    pub encoding: TargetEncoding,
    /// `true` once the task completed successfully.
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failure came from the whole converter invocation (non-zero exit or
    /// timeout) rather than from this task alone.
    #[serde(default)]
    pub group_error: bool,
}

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Snapshot of the whole pipeline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Whether the worker pool is running.
    pub running: bool,
    /// Tasks buffered in the batcher, not yet flushed.
    pub pending: usize,
    /// Batches flushed and waiting for a worker.
    pub queued: usize,
    /// Tasks that are not yet terminal.
    pub active: usize,
    /// Tasks that reached a terminal state.
    pub completed: usize,
    pub workers: usize,
    pub batch_size: usize,
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Point-in-time view of a background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    /// Tasks that finished successfully.
    pub succeeded: usize,
    /// Tasks that finished with an error.
    pub failed: usize,
    /// Tasks never dispatched because the job was cancelled.
    pub skipped: usize,
    pub total: usize,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub cancel_requested: bool,
    /// Job-level failure (e.g. converter unavailable, worker panic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    /// Tasks that reached a terminal state.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Completion ratio in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.completed() as f32 / self.total as f32
        }
    }
}
