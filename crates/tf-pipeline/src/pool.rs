//! Fixed-size worker pool draining the dispatch queue.
//!
//! Each worker loops: dequeue a batch (waiting at most the dequeue timeout so
//! a stop request is seen while idle), take a semaphore permit, mark the
//! batch processing, convert it, and record every task's outcome. A panic
//! inside the conversion fails that batch's tasks and the worker carries on.
//! On stop, workers exit only once the queue is empty.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tf_convert::{ConverterInvoker, Outcome};
use tf_core::TaskId;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::DispatchQueue;
use crate::registry::TaskRegistry;
use crate::task::{Batch, ConversionTask};

struct Running {
    stop: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Shared state handed to every worker.
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<DispatchQueue>,
    registry: Arc<TaskRegistry>,
    invoker: Arc<ConverterInvoker>,
    semaphore: Arc<Semaphore>,
    dequeue_timeout: Duration,
}

/// Pool of `workers` concurrent batch processors.
pub struct WorkerPool {
    workers: usize,
    ctx: WorkerContext,
    running: Mutex<Option<Running>>,
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        queue: Arc<DispatchQueue>,
        registry: Arc<TaskRegistry>,
        invoker: Arc<ConverterInvoker>,
        dequeue_timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            ctx: WorkerContext {
                queue,
                registry,
                invoker,
                semaphore: Arc::new(Semaphore::new(workers)),
                dequeue_timeout,
            },
            running: Mutex::new(None),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the workers on `runtime`. Returns `false` if already running.
    pub fn start(&self, runtime: &Handle) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let stop = CancellationToken::new();
        let handles = (0..self.workers)
            .map(|worker| {
                let ctx = self.ctx.clone();
                let stop = stop.clone();
                runtime.spawn(worker_loop(worker, ctx, stop))
            })
            .collect();

        tracing::info!(workers = self.workers, "Worker pool started");
        *running = Some(Running { stop, handles });
        true
    }

    /// Signal the workers to stop once the queue is drained, and wait for
    /// them to exit.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.stop.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker exited abnormally: {e}");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    /// Signal stop without waiting. Used when the pool is torn down.
    pub fn signal_stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.stop.cancel();
        }
    }
}

async fn worker_loop(worker: usize, ctx: WorkerContext, stop: CancellationToken) {
    tracing::debug!(worker, "Worker started");
    loop {
        match ctx.queue.pop(ctx.dequeue_timeout).await {
            Some(batch) => process_batch(worker, &ctx, batch).await,
            // Stop is signalled after the final flush, so once it is seen an
            // empty queue stays empty.
            None if stop.is_cancelled() && ctx.queue.is_empty() => break,
            None => {}
        }
    }
    tracing::debug!(worker, "Worker exiting");
}

async fn process_batch(worker: usize, ctx: &WorkerContext, batch: Batch) {
    let batch_id = batch.id();
    let tasks = batch.into_tasks();

    let _permit = match Arc::clone(&ctx.semaphore).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            fail_all(ctx, &tasks, "worker pool closed");
            return;
        }
    };

    let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
    ctx.registry.mark_processing(&ids);
    tracing::info!(worker, batch = batch_id, tasks = tasks.len(), "Processing batch");

    let requests: Vec<_> = tasks.iter().map(ConversionTask::request).collect();
    let invoker = Arc::clone(&ctx.invoker);
    let outcomes = match tokio::spawn(async move { invoker.convert_batch(&requests).await }).await
    {
        Ok(outcomes) => outcomes,
        Err(e) => {
            tracing::error!(worker, batch = batch_id, "Batch conversion panicked: {e}");
            let outcome = Outcome::Failed {
                message: format!("worker panicked: {e}"),
                group_wide: true,
            };
            vec![outcome; tasks.len()]
        }
    };

    let mut succeeded = 0usize;
    for (task, outcome) in tasks.iter().zip(outcomes.iter()) {
        if outcome.is_success() {
            succeeded += 1;
        }
        if let Some(status) = ctx.registry.complete(task.id, outcome) {
            task.notify(&status);
        }
    }

    tracing::info!(
        worker,
        batch = batch_id,
        succeeded,
        failed = tasks.len() - succeeded,
        "Batch finished"
    );
}

fn fail_all(ctx: &WorkerContext, tasks: &[ConversionTask], message: &str) {
    for task in tasks {
        if let Some(status) = ctx.registry.fail(task.id, message) {
            task.notify(&status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tf_convert::{BytesSource, Converter, Invocation};
    use tf_core::config::ConverterConfig;
    use tf_core::{TaskState, TextureCategory};

    /// Converter that writes every output and counts calls.
    #[derive(Default)]
    struct CopyConverter {
        calls: AtomicUsize,
        panic_on_call: bool,
    }

    #[async_trait]
    impl Converter for CopyConverter {
        fn name(&self) -> &str {
            "copy"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, invocation: &Invocation) -> tf_core::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_call {
                panic!("converter bug");
            }
            for input in &invocation.inputs {
                std::fs::copy(input, invocation.output_for(input))?;
            }
            Ok(())
        }
    }

    fn pool_with(converter: Arc<CopyConverter>) -> (WorkerPool, Arc<DispatchQueue>, Arc<TaskRegistry>) {
        let queue = Arc::new(DispatchQueue::new());
        let registry = Arc::new(TaskRegistry::new());
        let invoker = Arc::new(ConverterInvoker::new(converter, ConverterConfig::default()));
        let pool = WorkerPool::new(
            2,
            queue.clone(),
            registry.clone(),
            invoker,
            Duration::from_millis(20),
        );
        (pool, queue, registry)
    }

    fn tasks(dir: &std::path::Path, n: usize) -> Vec<ConversionTask> {
        (0..n)
            .map(|i| {
                ConversionTask::new(
                    Arc::new(BytesSource::new(format!("t{i}"), vec![i as u8])),
                    dir.join(format!("t{i}.dds")),
                    TextureCategory::Roughness,
                )
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drains_queue_before_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(CopyConverter::default());
        let (pool, queue, registry) = pool_with(converter.clone());

        let batch = tasks(dir.path(), 3);
        for t in &batch {
            registry.register(t);
        }
        queue.push(batch);

        assert!(pool.start(&Handle::current()));
        assert!(!pool.start(&Handle::current()));
        pool.shutdown().await;
        assert!(!pool.is_running());

        assert!(queue.is_empty());
        assert_eq!(registry.completed_count(), 3);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_fails_batch_but_worker_survives() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(CopyConverter {
            panic_on_call: true,
            ..Default::default()
        });
        let (pool, queue, registry) = pool_with(converter.clone());
        pool.start(&Handle::current());

        for _ in 0..3 {
            let batch = tasks(dir.path(), 2);
            for t in &batch {
                registry.register(t);
            }
            let ids: Vec<_> = batch.iter().map(|t| t.id).collect();
            queue.push(batch);
            assert!(registry.wait_for_all(&ids, Duration::from_secs(5), |_| {}).await);
            for id in ids {
                let status = registry.get_status(id).unwrap();
                assert_eq!(status.state, TaskState::Failed);
                assert!(status.error.unwrap().contains("worker panicked"));
            }
        }

        pool.shutdown().await;
        assert_eq!(converter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn task_callbacks_fire() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, queue, registry) = pool_with(Arc::new(CopyConverter::default()));
        let hits = Arc::new(AtomicUsize::new(0));

        let batch: Vec<_> = tasks(dir.path(), 2)
            .into_iter()
            .map(|t| {
                let h = hits.clone();
                t.on_done(move |s| {
                    assert!(s.result);
                    h.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for t in &batch {
            registry.register(t);
        }
        queue.push(batch);

        pool.start(&Handle::current());
        pool.shutdown().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
