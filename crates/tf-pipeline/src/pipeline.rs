//! The host-owned pipeline facade.
//!
//! A [`Pipeline`] owns its own tokio runtime plus the batcher, worker pool,
//! task registry, and job manager. Every method is synchronous and safe to
//! call from the host's single thread; nothing except the explicit `wait_*`
//! methods blocks.
//!
//! Host callbacks for background jobs are kept on the host side and only run
//! from [`Pipeline::poll_jobs`], which the host calls on its own schedule
//! (e.g. from a recurring timer every `jobs.poll_interval_ms`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tf_convert::{Converter, ConverterInvoker, TexconvConverter};
use tf_core::config::Config;
use tf_core::events::{JobEvent, JobSummary};
use tf_core::{JobId, JobStatus, QueueStatus, TaskId, TaskStatus};
use tokio::runtime::Runtime;

use crate::batcher::Batcher;
use crate::intake::Intake;
use crate::jobs::{BackgroundJobManager, JobPlan};
use crate::pool::WorkerPool;
use crate::queue::DispatchQueue;
use crate::registry::TaskRegistry;
use crate::task::ConversionTask;

type EventCallback = Box<dyn FnMut(&JobEvent)>;
type CompletionCallback = Box<dyn FnOnce(&JobSummary)>;

/// Host-side callbacks for one job. Never leave the host thread.
struct HostCallbacks {
    on_event: EventCallback,
    on_complete: Option<CompletionCallback>,
}

/// Counters for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Batches flushed into the dispatch queue.
    pub batches_dispatched: u64,
    /// Converter processes started.
    pub invocations: u64,
    /// Tasks satisfied by an existing output without conversion.
    pub tasks_skipped_existing: u64,
}

/// What one [`Pipeline::poll_jobs`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Events handed to progress callbacks.
    pub delivered: usize,
    /// Jobs that reached a terminal state and had completion fired.
    pub finished: usize,
    /// Jobs still running.
    pub active: usize,
}

impl PollOutcome {
    /// Whether the host can stop scheduling its poll callback.
    pub fn is_idle(&self) -> bool {
        self.active == 0
    }
}

/// Parallel texture conversion pipeline.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tf_convert::ImageFileSource;
/// use tf_core::{config::Config, TextureCategory};
/// use tf_pipeline::{ConversionTask, Pipeline};
///
/// # fn main() -> tf_core::Result<()> {
/// let pipeline = Pipeline::new(Config::default())?;
/// let task = ConversionTask::new(
///     Arc::new(ImageFileSource::new("brick.png")),
///     "out/brick.a.rtex.dds",
///     TextureCategory::BaseColor,
/// );
/// let id = pipeline.submit(task);
/// pipeline.wait_for(id, Duration::from_secs(60));
/// println!("{:?}", pipeline.get_status(id));
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    config: Config,
    intake: Intake,
    queue: Arc<DispatchQueue>,
    invoker: Arc<ConverterInvoker>,
    jobs: Arc<BackgroundJobManager>,
    callbacks: RefCell<HashMap<JobId, HostCallbacks>>,
    // Declared last so it drops after everything holding a handle to it.
    runtime: Runtime,
}

impl Pipeline {
    /// Build a pipeline using the converter found from `config` or `PATH`.
    ///
    /// A missing converter is not an error here: [`is_available`]
    /// (Self::is_available) reports it and every submitted task fails with
    /// `"converter not found"`.
    pub fn new(config: Config) -> tf_core::Result<Self> {
        let converter = Arc::new(TexconvConverter::discover(&config.converter));
        Self::with_converter(config, converter)
    }

    /// Build a pipeline around an explicit converter.
    pub fn with_converter(config: Config, converter: Arc<dyn Converter>) -> tf_core::Result<Self> {
        let workers = config.pipeline.effective_workers();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(2))
            .thread_name("texforge-rt")
            .enable_all()
            .build()?;

        let queue = Arc::new(DispatchQueue::new());
        let registry = Arc::new(TaskRegistry::new());
        let invoker = Arc::new(ConverterInvoker::new(
            Arc::clone(&converter),
            config.converter.clone(),
        ));
        let batcher = Batcher::new(
            Arc::clone(&queue),
            config.pipeline.effective_batch_size(),
            config.pipeline.batch_timeout(),
            runtime.handle().clone(),
        );
        let pool = Arc::new(WorkerPool::new(
            workers,
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&invoker),
            config.pipeline.dequeue_timeout(),
        ));
        let jobs = BackgroundJobManager::new(config.jobs.event_capacity);

        tracing::debug!(
            workers,
            batch_size = batcher.batch_size(),
            converter = converter.name(),
            available = converter.is_available(),
            "Pipeline created"
        );

        Ok(Self {
            intake: Intake {
                registry,
                batcher,
                pool,
                converter,
                runtime: runtime.handle().clone(),
            },
            config,
            queue,
            invoker,
            jobs,
            callbacks: RefCell::new(HashMap::new()),
            runtime,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the converter can be invoked.
    pub fn is_available(&self) -> bool {
        self.intake.is_available()
    }

    // -- Worker pool -----------------------------------------------------------

    /// Start the worker pool. Submitting also starts it on demand. Returns
    /// `false` if it was already running.
    pub fn start(&self) -> bool {
        self.intake.pool.start(self.runtime.handle())
    }

    /// Cancel running jobs, flush any partial batch, let the workers drain
    /// the queue, and wait for them to exit.
    ///
    /// Jobs are stopped first so none of them can restart the pool by
    /// dispatching another batch. Their final events are still delivered by
    /// the next [`poll_jobs`](Self::poll_jobs).
    pub fn stop(&self) {
        self.runtime.block_on(self.jobs.shutdown());
        self.intake.batcher.flush();
        self.runtime.block_on(self.intake.pool.shutdown());
    }

    pub fn is_running(&self) -> bool {
        self.intake.pool.is_running()
    }

    // -- Tasks -----------------------------------------------------------------

    /// Submit one task. Never blocks.
    pub fn submit(&self, task: ConversionTask) -> TaskId {
        self.intake.submit(task)
    }

    /// Submit many tasks and flush immediately. Never blocks.
    pub fn submit_batch(&self, tasks: Vec<ConversionTask>) -> Vec<TaskId> {
        self.intake.submit_many(tasks)
    }

    pub fn get_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.intake.registry.get_status(id)
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            running: self.is_running(),
            pending: self.intake.batcher.pending_len(),
            queued: self.queue.len(),
            active: self.intake.registry.active_count(),
            completed: self.intake.registry.completed_count(),
            workers: self.intake.pool.workers(),
            batch_size: self.intake.batcher.batch_size(),
        }
    }

    /// Block until the task is terminal or `timeout` elapses.
    pub fn wait_for(&self, id: TaskId, timeout: Duration) -> bool {
        self.runtime
            .block_on(self.intake.registry.wait_for(id, timeout))
    }

    /// Block until every task is terminal or `timeout` elapses, reporting the
    /// number still outstanding through `progress`.
    pub fn wait_for_all<F>(&self, ids: &[TaskId], timeout: Duration, progress: F) -> bool
    where
        F: FnMut(usize),
    {
        self.runtime
            .block_on(self.intake.registry.wait_for_all(ids, timeout, progress))
    }

    /// Drop every terminal task record. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        self.intake.registry.clear_completed()
    }

    pub fn stats(&self) -> PipelineStats {
        let invoker = self.invoker.stats();
        PipelineStats {
            batches_dispatched: self.queue.dispatched(),
            invocations: invoker.invocations(),
            tasks_skipped_existing: invoker.skipped_existing(),
        }
    }

    // -- Background jobs -------------------------------------------------------

    /// Run `tasks` as a background job.
    ///
    /// `on_event` receives every structured event the job emits that was not
    /// dropped under backpressure. `on_complete` fires exactly once with the
    /// final summary. Both run only inside [`poll_jobs`](Self::poll_jobs).
    pub fn start_background_job<P, C>(
        &self,
        tasks: Vec<ConversionTask>,
        on_event: P,
        on_complete: C,
    ) -> JobId
    where
        P: FnMut(&JobEvent) + 'static,
        C: FnOnce(&JobSummary) + 'static,
    {
        let plan = JobPlan {
            batch_size: self.intake.batcher.batch_size(),
            max_in_flight: self.intake.pool.workers(),
        };
        let id = self.jobs.start(tasks, self.intake.clone(), plan);
        self.callbacks.borrow_mut().insert(
            id,
            HostCallbacks {
                on_event: Box::new(on_event),
                on_complete: Some(Box::new(on_complete)),
            },
        );
        id
    }

    /// Request cancellation of a job. In-flight batches finish; no new ones
    /// are dispatched.
    pub fn cancel_job(&self, id: JobId) -> bool {
        self.jobs.cancel(id)
    }

    /// Cancel every active job. Returns how many were cancelled.
    pub fn cancel_all_jobs(&self) -> usize {
        self.jobs.cancel_all()
    }

    pub fn get_job_status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.status(id)
    }

    pub fn active_job_ids(&self) -> Vec<JobId> {
        self.jobs.active_ids()
    }

    /// Forget every completed job. Returns how many were removed.
    pub fn cleanup_completed_jobs(&self) -> usize {
        self.jobs.cleanup_completed()
    }

    /// The host's single re-entry point for job progress.
    ///
    /// Migrates terminal jobs to the completed registry, replays queued
    /// events into progress callbacks, then fires the completion callback of
    /// every job that just finished.
    pub fn poll_jobs(&self) -> PollOutcome {
        // Terminal jobs queued their final event before turning terminal, so
        // draining after this snapshot delivers all of their events.
        let finished = self.jobs.take_finished();
        let events = self.jobs.drain_events();

        let mut delivered = 0;
        for event in &events {
            // Take the callback out while it runs so it may call back into
            // the pipeline.
            let entry = self.callbacks.borrow_mut().remove(&event.job_id);
            if let Some(mut callbacks) = entry {
                (callbacks.on_event)(event);
                delivered += 1;
                self.callbacks.borrow_mut().insert(event.job_id, callbacks);
            }
        }

        for status in &finished {
            let entry = self.callbacks.borrow_mut().remove(&status.id);
            if let Some(on_complete) = entry.and_then(|c| c.on_complete) {
                on_complete(&JobSummary::from(status));
            }
        }

        PollOutcome {
            delivered,
            finished: finished.len(),
            active: self.jobs.active_count(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.jobs.cancel_all();
        self.intake.pool.signal_stop();
    }
}
