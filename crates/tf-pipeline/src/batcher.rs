//! Size- and idle-time-bounded batching of submitted tasks.
//!
//! Tasks accumulate in a pending list. Reaching `batch_size` flushes the
//! list into the [`DispatchQueue`] immediately; otherwise every arrival
//! re-arms an idle timer, and when the timer fires with no newer arrival the
//! partial batch is flushed as-is.
//!
//! The pending list, the timer handle, and a generation counter share one
//! lock. Every flush bumps the generation, so a timer that fires while a
//! flush holds the lock finds a stale generation and does nothing.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tf_core::TaskId;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::queue::DispatchQueue;
use crate::task::ConversionTask;

#[derive(Default)]
struct PendingState {
    tasks: Vec<ConversionTask>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Accumulates tasks into batches.
pub struct Batcher {
    state: Mutex<PendingState>,
    queue: Arc<DispatchQueue>,
    batch_size: usize,
    timeout: Duration,
    runtime: Handle,
}

impl Batcher {
    /// Create a batcher flushing into `queue`. Idle timers are spawned on
    /// `runtime`, so submission works from threads outside it.
    pub fn new(
        queue: Arc<DispatchQueue>,
        batch_size: usize,
        timeout: Duration,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PendingState::default()),
            queue,
            batch_size: batch_size.max(1),
            timeout,
            runtime,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Add one task. Never blocks.
    pub fn submit(self: &Arc<Self>, task: ConversionTask) -> TaskId {
        let id = task.id;
        let mut state = self.state.lock();
        state.tasks.push(task);
        if state.tasks.len() >= self.batch_size {
            self.flush_locked(&mut state);
        } else {
            self.arm_timer(&mut state);
        }
        id
    }

    /// Add many tasks, then flush whatever partial batch remains so bulk
    /// submissions never wait on the idle timer.
    pub fn submit_many(self: &Arc<Self>, tasks: Vec<ConversionTask>) -> Vec<TaskId> {
        let ids = tasks.iter().map(|t| t.id).collect();
        let mut state = self.state.lock();
        for task in tasks {
            state.tasks.push(task);
            if state.tasks.len() >= self.batch_size {
                self.flush_locked(&mut state);
            }
        }
        self.flush_locked(&mut state);
        ids
    }

    /// Flush the pending list now. A no-op when nothing is pending.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        self.flush_locked(&mut state);
    }

    /// Tasks waiting to be flushed.
    pub fn pending_len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    fn flush_locked(&self, state: &mut PendingState) {
        state.generation = state.generation.wrapping_add(1);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.tasks.is_empty() {
            return;
        }
        let tasks = std::mem::take(&mut state.tasks);
        self.queue.push(tasks);
    }

    fn arm_timer(self: &Arc<Self>, state: &mut PendingState) {
        state.generation = state.generation.wrapping_add(1);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let generation = state.generation;
        let timeout = self.timeout;
        let weak: Weak<Self> = Arc::downgrade(self);
        state.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(batcher) = weak.upgrade() {
                batcher.on_timer(generation);
            }
        }));
    }

    fn on_timer(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        // This is the running timer; dropping its handle detaches it.
        state.timer = None;
        tracing::trace!(pending = state.tasks.len(), "Batch timeout elapsed");
        self.flush_locked(&mut state);
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_convert::BytesSource;
    use tf_core::TextureCategory;

    fn task() -> ConversionTask {
        ConversionTask::new(
            Arc::new(BytesSource::new("t", vec![])),
            "/out/t.dds",
            TextureCategory::Metallic,
        )
    }

    fn batcher(size: usize, timeout_ms: u64) -> (Arc<Batcher>, Arc<DispatchQueue>) {
        let queue = Arc::new(DispatchQueue::new());
        let b = Batcher::new(
            queue.clone(),
            size,
            Duration::from_millis(timeout_ms),
            Handle::current(),
        );
        (b, queue)
    }

    #[tokio::test]
    async fn full_batches_flush_immediately() {
        let (b, q) = batcher(4, 10_000);
        for _ in 0..10 {
            b.submit(task());
        }
        assert_eq!(q.len(), 2);
        assert_eq!(b.pending_len(), 2);
    }

    #[tokio::test]
    async fn submit_many_flushes_partial() {
        let (b, q) = batcher(4, 10_000);
        let ids = b.submit_many((0..10).map(|_| task()).collect());
        assert_eq!(ids.len(), 10);
        assert_eq!(b.pending_len(), 0);
        let sizes: Vec<usize> = std::iter::from_fn(|| q.try_pop()).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn idle_timeout_flushes_partial() {
        let (b, q) = batcher(4, 50);
        b.submit(task());
        assert_eq!(q.len(), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(b.pending_len(), 0);
    }

    #[tokio::test]
    async fn arrivals_rearm_the_timer() {
        let (b, q) = batcher(10, 150);
        b.submit(task());
        tokio::time::sleep(Duration::from_millis(100)).await;
        b.submit(task());
        tokio::time::sleep(Duration::from_millis(100)).await;
        // 200ms after the first arrival but only 100ms after the second.
        assert_eq!(q.len(), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(q.try_pop().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn flush_beats_timer() {
        let (b, q) = batcher(4, 30);
        b.submit(task());
        b.flush();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The timer saw a stale generation and did not flush an empty batch.
        assert_eq!(q.dispatched(), 1);
    }

    #[tokio::test]
    async fn empty_flush_is_noop() {
        let (b, q) = batcher(4, 30);
        b.flush();
        assert_eq!(q.dispatched(), 0);
    }
}
