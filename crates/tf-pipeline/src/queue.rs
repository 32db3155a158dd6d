//! The dispatch queue between the batcher and the workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::task::{Batch, ConversionTask};

/// FIFO of flushed batches. Pushing never blocks; popping waits up to a
/// timeout so idle workers can observe a stop request.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    batches: Mutex<VecDeque<Batch>>,
    notify: Notify,
    dispatched: AtomicU64,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seal `tasks` into a batch and enqueue it. Returns the batch id.
    pub fn push(&self, tasks: Vec<ConversionTask>) -> u64 {
        let id = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        let len = tasks.len();
        self.batches.lock().push_back(Batch::new(id, tasks));
        tracing::debug!(batch = id, tasks = len, "Batch dispatched");
        self.notify.notify_one();
        id
    }

    /// Take the next batch without waiting.
    pub fn try_pop(&self) -> Option<Batch> {
        let mut batches = self.batches.lock();
        let batch = batches.pop_front();
        // `notify_one` stores a single permit; pass it on if more work remains.
        if batch.is_some() && !batches.is_empty() {
            self.notify.notify_one();
        }
        batch
    }

    /// Take the next batch, waiting at most `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Option<Batch> {
        if let Some(batch) = self.try_pop() {
            return Some(batch);
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.try_pop()
    }

    /// Batches waiting for a worker.
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total batches ever enqueued.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
