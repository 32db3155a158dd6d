//! Per-task state tracking, status queries, and waits.
//!
//! Every task has a record in exactly one of two maps: `active` (pending or
//! processing) or `completed` (terminal). Records carry a `watch` channel of
//! the task's state so waiters are woken on the transition instead of
//! polling. Structural changes take the write lock; status queries only
//! read.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use tf_convert::Outcome;
use tf_core::{TaskId, TaskState, TaskStatus};
use tokio::sync::watch;

use crate::task::ConversionTask;

struct TaskRecord {
    status: TaskStatus,
    state_tx: watch::Sender<TaskState>,
}

#[derive(Default)]
struct RegistryMaps {
    active: HashMap<TaskId, TaskRecord>,
    completed: HashMap<TaskId, TaskRecord>,
}

/// Tracks every task from submission until it is cleared.
#[derive(Default)]
pub struct TaskRegistry {
    maps: RwLock<RegistryMaps>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly submitted task as pending.
    pub fn register(&self, task: &ConversionTask) {
        let status = TaskStatus {
            id: task.id,
            state: TaskState::Pending,
            name: task.source.name().to_string(),
            output_path: task.output_path.clone(),
            category: task.category,
            encoding: task.resolved_encoding(),
            result: false,
            error: None,
            group_error: false,
        };
        let (state_tx, _) = watch::channel(TaskState::Pending);
        self.maps
            .write()
            .active
            .insert(task.id, TaskRecord { status, state_tx });
    }

    /// Move pending tasks to processing. Tasks in any other state are left
    /// alone.
    pub fn mark_processing(&self, ids: &[TaskId]) {
        let mut maps = self.maps.write();
        for id in ids {
            if let Some(record) = maps.active.get_mut(id) {
                if record.status.state == TaskState::Pending {
                    record.status.state = TaskState::Processing;
                    record.state_tx.send_replace(TaskState::Processing);
                }
            }
        }
    }

    /// Record a conversion outcome. Returns the final status, or `None` if
    /// the task is unknown or already terminal.
    pub fn complete(&self, id: TaskId, outcome: &Outcome) -> Option<TaskStatus> {
        match outcome {
            Outcome::Converted | Outcome::AlreadyPresent => self.finish(id, true, None, false),
            Outcome::Failed {
                message,
                group_wide,
            } => self.finish(id, false, Some(message.clone()), *group_wide),
        }
    }

    /// Fail a task outside a conversion (e.g. no converter, worker panic).
    pub fn fail(&self, id: TaskId, message: impl Into<String>) -> Option<TaskStatus> {
        self.finish(id, false, Some(message.into()), false)
    }

    fn finish(
        &self,
        id: TaskId,
        result: bool,
        error: Option<String>,
        group_error: bool,
    ) -> Option<TaskStatus> {
        let next = if result {
            TaskState::Completed
        } else {
            TaskState::Failed
        };

        let mut maps = self.maps.write();
        let can_move = maps
            .active
            .get(&id)
            .is_some_and(|r| r.status.state.can_transition_to(next));
        if !can_move {
            return None;
        }

        let mut record = maps.active.remove(&id)?;
        record.status.state = next;
        record.status.result = result;
        record.status.error = error;
        record.status.group_error = group_error;
        record.state_tx.send_replace(next);
        let status = record.status.clone();
        maps.completed.insert(id, record);
        Some(status)
    }

    /// Current status of a task, if it is known.
    pub fn get_status(&self, id: TaskId) -> Option<TaskStatus> {
        let maps = self.maps.read();
        maps.active
            .get(&id)
            .or_else(|| maps.completed.get(&id))
            .map(|r| r.status.clone())
    }

    fn subscribe(&self, id: TaskId) -> Option<watch::Receiver<TaskState>> {
        let maps = self.maps.read();
        maps.active
            .get(&id)
            .or_else(|| maps.completed.get(&id))
            .map(|r| r.state_tx.subscribe())
    }

    /// Wait until the task is terminal and return its status.
    ///
    /// # Errors
    ///
    /// - [`tf_core::Error::NotFound`] if the task is unknown.
    /// - [`tf_core::Error::WaitTimeout`] if `timeout` elapses first. The
    ///   task itself is unaffected.
    pub async fn wait(&self, id: TaskId, timeout: Duration) -> tf_core::Result<TaskStatus> {
        let mut rx = self
            .subscribe(id)
            .ok_or_else(|| tf_core::Error::not_found("task", id))?;
        let reached = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| s.is_terminal()).await.is_ok()
        })
        .await;
        match reached {
            Ok(_) => self
                .get_status(id)
                .ok_or_else(|| tf_core::Error::not_found("task", id)),
            Err(_) => Err(tf_core::Error::WaitTimeout { waited: timeout }),
        }
    }

    /// Wait without a deadline. Returns `None` for unknown tasks.
    pub async fn wait_terminal(&self, id: TaskId) -> Option<TaskStatus> {
        let mut rx = self.subscribe(id)?;
        let _ = rx.wait_for(|s| s.is_terminal()).await.is_ok();
        self.get_status(id)
    }

    /// Whether the task reached a terminal state within `timeout`. Unknown
    /// tasks report `false`.
    pub async fn wait_for(&self, id: TaskId, timeout: Duration) -> bool {
        self.wait(id, timeout).await.is_ok()
    }

    /// Wait for all `ids` to be terminal, calling `progress` with the number
    /// still outstanding once up front and again after every completion.
    ///
    /// Unknown ids count as already done. Returns `false` if `timeout`
    /// elapses first.
    pub async fn wait_for_all<F>(&self, ids: &[TaskId], timeout: Duration, mut progress: F) -> bool
    where
        F: FnMut(usize),
    {
        let mut waits = FuturesUnordered::new();
        for &id in ids {
            if let Some(mut rx) = self.subscribe(id) {
                waits.push(async move { rx.wait_for(|s| s.is_terminal()).await.is_ok() });
            }
        }

        let mut remaining = waits.len();
        progress(remaining);

        let all = async {
            while waits.next().await.is_some() {
                remaining -= 1;
                progress(remaining);
            }
        };
        tokio::time::timeout(timeout, all).await.is_ok()
    }

    /// Tasks not yet terminal.
    pub fn active_count(&self) -> usize {
        self.maps.read().active.len()
    }

    /// Tasks in a terminal state.
    pub fn completed_count(&self) -> usize {
        self.maps.read().completed.len()
    }

    /// Drop every terminal record. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut maps = self.maps.write();
        let n = maps.completed.len();
        maps.completed.clear();
        n
    }
}
