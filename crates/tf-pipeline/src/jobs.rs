//! Background jobs: a whole submission converted off the host thread.
//!
//! A job runs as a task on the pipeline runtime. It feeds its tasks to the
//! intake one batch at a time, keeping at most `max_in_flight` of its batches
//! outstanding, and checks for cancellation before dispatching each new one.
//! Batches already dispatched always run to completion.
//!
//! The job never calls into the host. Everything it has to report becomes a
//! [`JobEvent`] on a bounded channel that the host drains on its own thread;
//! terminal jobs are moved from the active to the completed registry by that
//! same drain (see `Pipeline::poll_jobs`). When the channel is full only
//! `Progress` events are dropped. Every other event waits in an unbounded
//! overflow queue, and once anything has overflowed later events queue
//! behind it so each job's events stay in order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use tf_core::events::{JobEvent, JobEventKind, JobSummary};
use tf_core::{JobId, JobState, JobStatus};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::intake::Intake;
use crate::task::ConversionTask;

/// How a job slices and paces its tasks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JobPlan {
    pub(crate) batch_size: usize,
    pub(crate) max_in_flight: usize,
}

struct JobHandle {
    id: JobId,
    status: Mutex<JobStatus>,
    cancel: CancellationToken,
    started: Instant,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobHandle {
    fn new(total: usize) -> Self {
        let id = JobId::new();
        Self {
            id,
            status: Mutex::new(JobStatus {
                id,
                state: JobState::Queued,
                succeeded: 0,
                failed: 0,
                skipped: 0,
                total,
                last_message: None,
                created_at: Utc::now(),
                elapsed_secs: 0.0,
                cancel_requested: false,
                error: None,
            }),
            cancel: CancellationToken::new(),
            started: Instant::now(),
            task: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> JobStatus {
        let mut status = self.status.lock().clone();
        if !status.state.is_terminal() {
            status.elapsed_secs = self.started.elapsed().as_secs_f64();
        }
        status
    }
}

/// Owns every job from start until it is cleaned up.
pub struct BackgroundJobManager {
    active: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    completed: RwLock<HashMap<JobId, JobStatus>>,
    events_tx: mpsc::Sender<JobEvent>,
    events_rx: Mutex<mpsc::Receiver<JobEvent>>,
    overflow: Mutex<VecDeque<JobEvent>>,
}

impl BackgroundJobManager {
    pub fn new(event_capacity: usize) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(event_capacity.max(1));
        Arc::new(Self {
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(events_rx),
            overflow: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn start(
        self: &Arc<Self>,
        tasks: Vec<ConversionTask>,
        intake: Intake,
        plan: JobPlan,
    ) -> JobId {
        let job = Arc::new(JobHandle::new(tasks.len()));
        let id = job.id;
        self.active.write().insert(id, Arc::clone(&job));

        let manager = Arc::clone(self);
        let runtime = intake.runtime.clone();
        let handle = Arc::clone(&job);
        let task = runtime.spawn(async move {
            let inner = {
                let manager = Arc::clone(&manager);
                let job = Arc::clone(&job);
                tokio::spawn(async move { manager.run(&job, tasks, intake, plan).await })
            };
            if let Err(e) = inner.await {
                tracing::error!(job_id = %job.id, "Job task failed: {e}");
                manager.finish(&job, Some(format!("job panicked: {e}")));
            }
        });
        *handle.task.lock() = Some(task);

        id
    }

    async fn run(&self, job: &JobHandle, tasks: Vec<ConversionTask>, intake: Intake, plan: JobPlan) {
        let total = tasks.len();
        job.status.lock().state = JobState::Processing;
        self.emit(job, JobEventKind::Started { total });
        tracing::info!(job_id = %job.id, total, "Job started");

        if !intake.is_available() {
            job.status.lock().failed = total;
            self.finish(job, Some(tf_core::Error::ConverterUnavailable.to_string()));
            return;
        }

        let batch_size = plan.batch_size.max(1);
        let mut chunks: VecDeque<Vec<ConversionTask>> = VecDeque::new();
        let mut rest = tasks;
        while !rest.is_empty() {
            let tail = rest.split_off(batch_size.min(rest.len()));
            chunks.push_back(rest);
            rest = tail;
        }

        let mut in_flight = FuturesUnordered::new();
        let mut outstanding: HashMap<usize, usize> = HashMap::new();
        let mut next_batch = 0usize;
        let mut group_reasons: HashSet<String> = HashSet::new();
        let mut completed = 0usize;

        loop {
            while outstanding.len() < plan.max_in_flight.max(1) && !job.cancel.is_cancelled() {
                let Some(chunk) = chunks.pop_front() else {
                    break;
                };
                let batch = next_batch;
                next_batch += 1;
                let ids = intake.submit_many(chunk);
                tracing::debug!(job_id = %job.id, batch, tasks = ids.len(), "Job batch submitted");
                outstanding.insert(batch, ids.len());
                for id in ids {
                    let registry = Arc::clone(&intake.registry);
                    in_flight.push(async move { (batch, id, registry.wait_terminal(id).await) });
                }
            }

            let Some((batch, task_id, status)) = in_flight.next().await else {
                break;
            };

            completed += 1;
            let (success, error, group_error) = match status {
                Some(s) => (s.result, s.error, s.group_error),
                None => (false, Some("task record missing".to_string()), false),
            };
            {
                let mut s = job.status.lock();
                if success {
                    s.succeeded += 1;
                } else {
                    s.failed += 1;
                }
            }

            if group_error {
                if let Some(reason) = &error {
                    if group_reasons.insert(reason.clone()) {
                        self.emit(
                            job,
                            JobEventKind::GroupFailed {
                                reason: reason.clone(),
                            },
                        );
                    }
                }
            }
            self.emit(
                job,
                JobEventKind::TaskDone {
                    task_id,
                    success,
                    error,
                },
            );
            self.emit(
                job,
                JobEventKind::Progress {
                    completed,
                    total,
                    percent: completed as f32 * 100.0 / total.max(1) as f32,
                },
            );

            if let Some(left) = outstanding.get_mut(&batch) {
                *left -= 1;
                if *left == 0 {
                    outstanding.remove(&batch);
                }
            }
        }

        let skipped: usize = chunks.iter().map(Vec::len).sum();
        if skipped > 0 {
            tracing::info!(job_id = %job.id, skipped, "Job cancelled before dispatching all batches");
        }
        job.status.lock().skipped = skipped;
        self.finish(job, None);
    }

    /// Settle the job's terminal state and emit `JobDone`. The event is
    /// queued before the state turns terminal, so whoever observes the
    /// terminal state can also drain the event.
    fn finish(&self, job: &JobHandle, error: Option<String>) {
        let summary = {
            let mut s = job.status.lock();
            if s.state.is_terminal() {
                return;
            }
            s.elapsed_secs = job.started.elapsed().as_secs_f64();
            let state = if error.is_some() {
                s.error = error;
                JobState::Failed
            } else if s.cancel_requested {
                JobState::Cancelled
            } else if s.total > 0 && s.succeeded == 0 {
                s.error = Some(format!("all {} tasks failed", s.total));
                JobState::Failed
            } else {
                JobState::Completed
            };
            let mut summary = JobSummary::from(&*s);
            summary.state = state;
            summary
        };

        self.emit(job, JobEventKind::JobDone(summary.clone()));
        job.status.lock().state = summary.state;
        tracing::info!(
            job_id = %job.id,
            state = %summary.state,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Job finished in {:.1}s",
            summary.elapsed_secs
        );
    }

    fn emit(&self, job: &JobHandle, kind: JobEventKind) {
        let event = JobEvent::new(job.id, kind);
        job.status.lock().last_message = Some(event.describe());

        let mut overflow = self.overflow.lock();
        let event = if overflow.is_empty() {
            match self.events_tx.try_send(event) {
                Ok(()) | Err(TrySendError::Closed(_)) => return,
                Err(TrySendError::Full(event)) => event,
            }
        } else {
            event
        };

        if matches!(event.kind, JobEventKind::Progress { .. }) {
            tracing::debug!(job_id = %event.job_id, "Job event channel full; dropping progress event");
        } else {
            overflow.push_back(event);
        }
    }

    /// Request cancellation. Returns `false` for unknown or finished jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        let Some(job) = self.active.read().get(&id).cloned() else {
            return false;
        };
        {
            let mut s = job.status.lock();
            if s.state.is_terminal() {
                return false;
            }
            s.cancel_requested = true;
        }
        job.cancel.cancel();
        tracing::info!(job_id = %id, "Job cancellation requested");
        true
    }

    /// Cancel every active job. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.active_ids()
            .into_iter()
            .filter(|id| self.cancel(*id))
            .count()
    }

    /// Cancel every active job and wait until none of them can dispatch
    /// another batch. Batches already dispatched run to completion first.
    pub async fn shutdown(&self) {
        self.cancel_all();
        let tasks: Vec<JoinHandle<()>> = self
            .active
            .read()
            .values()
            .filter_map(|job| job.task.lock().take())
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Job task failed: {e}");
            }
        }
    }

    /// Status of an active or completed job.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        if let Some(job) = self.active.read().get(&id) {
            return Some(job.snapshot());
        }
        self.completed.read().get(&id).cloned()
    }

    pub fn active_ids(&self) -> Vec<JobId> {
        self.active.read().keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read().len()
    }

    /// Forget every completed job. Returns how many were removed.
    pub fn cleanup_completed(&self) -> usize {
        let mut completed = self.completed.write();
        let n = completed.len();
        completed.clear();
        n
    }

    /// Move terminal jobs from the active to the completed registry and
    /// return their final statuses.
    pub fn take_finished(&self) -> Vec<JobStatus> {
        let mut active = self.active.write();
        let finished: Vec<JobStatus> = active
            .values()
            .map(|job| job.snapshot())
            .filter(|s| s.state.is_terminal())
            .collect();

        let mut completed = self.completed.write();
        for status in &finished {
            active.remove(&status.id);
            completed.insert(status.id, status.clone());
        }
        finished
    }

    /// Take every queued event without waiting, channel first and then the
    /// overflow queue.
    pub fn drain_events(&self) -> Vec<JobEvent> {
        // Holding the overflow lock keeps emitters out until both are drained.
        let mut overflow = self.overflow.lock();
        let mut rx = self.events_rx.lock();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events.extend(overflow.drain(..));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(manager: &BackgroundJobManager, total: usize) -> Arc<JobHandle> {
        let job = Arc::new(JobHandle::new(total));
        manager.active.write().insert(job.id, job.clone());
        job
    }

    #[test]
    fn finish_moves_through_take_finished() {
        let manager = BackgroundJobManager::new(16);
        let job = insert(&manager, 2);
        job.status.lock().succeeded = 2;

        assert!(manager.take_finished().is_empty());
        manager.finish(&job, None);

        let finished = manager.take_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].state, JobState::Completed);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.completed_count(), 1);
        assert_eq!(manager.status(job.id).unwrap().state, JobState::Completed);

        let events = manager.drain_events();
        assert!(events.last().unwrap().is_final());

        assert_eq!(manager.cleanup_completed(), 1);
        assert!(manager.status(job.id).is_none());
    }

    #[test]
    fn cancelled_job_finishes_cancelled() {
        let manager = BackgroundJobManager::new(16);
        let job = insert(&manager, 4);
        assert!(manager.cancel(job.id));
        assert!(job.cancel.is_cancelled());

        manager.finish(&job, None);
        assert_eq!(manager.status(job.id).unwrap().state, JobState::Cancelled);
        // Finished jobs cannot be cancelled again.
        assert!(!manager.cancel(job.id));
    }

    #[test]
    fn all_failed_job_is_failed() {
        let manager = BackgroundJobManager::new(16);
        let job = insert(&manager, 3);
        job.status.lock().failed = 3;
        manager.finish(&job, None);
        let status = manager.status(job.id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("all 3 tasks failed"));
    }

    #[test]
    fn job_error_wins_and_finish_is_idempotent() {
        let manager = BackgroundJobManager::new(16);
        let job = insert(&manager, 1);
        manager.finish(&job, Some("converter not found".into()));
        manager.finish(&job, None);
        let status = manager.status(job.id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("converter not found"));
        assert_eq!(
            manager
                .drain_events()
                .iter()
                .filter(|e| e.is_final())
                .count(),
            1
        );
    }

    #[test]
    fn full_channel_drops_only_progress() {
        let manager = BackgroundJobManager::new(1);
        let job = insert(&manager, 10);
        let task_id = tf_core::TaskId::next();
        manager.emit(&job, JobEventKind::Started { total: 10 });
        manager.emit(
            &job,
            JobEventKind::Progress {
                completed: 1,
                total: 10,
                percent: 10.0,
            },
        );
        assert_eq!(
            job.status.lock().last_message.as_deref(),
            Some("Processed 1/10 textures (10%)")
        );
        manager.emit(
            &job,
            JobEventKind::TaskDone {
                task_id,
                success: false,
                error: Some("invalid format".into()),
            },
        );
        job.status.lock().failed = 10;
        manager.finish(&job, None);

        let events = manager.drain_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].kind, JobEventKind::Started { .. }));
        assert!(matches!(
            events[1].kind,
            JobEventKind::TaskDone { success: false, .. }
        ));
        assert!(events[2].is_final());
        assert!(manager.drain_events().is_empty());
    }

    #[test]
    fn overflow_keeps_order_after_channel_frees() {
        let manager = BackgroundJobManager::new(1);
        let job = insert(&manager, 2);
        for reason in ["a", "b"] {
            manager.emit(
                &job,
                JobEventKind::GroupFailed {
                    reason: reason.into(),
                },
            );
        }
        // One slot is free again, but "c" must still follow "b".
        let first = manager.events_rx.lock().try_recv().ok().map(|e| e.kind);
        assert_eq!(
            first,
            Some(JobEventKind::GroupFailed { reason: "a".into() })
        );
        manager.emit(&job, JobEventKind::GroupFailed { reason: "c".into() });
        let reasons: Vec<String> = manager
            .drain_events()
            .into_iter()
            .filter_map(|e| match e.kind {
                JobEventKind::GroupFailed { reason } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec!["b", "c"]);
    }

    #[test]
    fn unknown_job_queries() {
        let manager = BackgroundJobManager::new(4);
        assert!(!manager.cancel(JobId::new()));
        assert!(manager.status(JobId::new()).is_none());
        assert_eq!(manager.cancel_all(), 0);
        assert!(manager.drain_events().is_empty());
    }
}
