//! The single submission path shared by direct submits and background jobs.

use std::sync::Arc;

use tf_convert::Converter;
use tf_core::TaskId;
use tokio::runtime::Handle;

use crate::batcher::Batcher;
use crate::pool::WorkerPool;
use crate::registry::TaskRegistry;
use crate::task::ConversionTask;

/// Registers tasks, then hands them to the batcher, starting the worker pool
/// on first use. With no converter, tasks are failed on the spot and never
/// queued.
#[derive(Clone)]
pub(crate) struct Intake {
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) batcher: Arc<Batcher>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) converter: Arc<dyn Converter>,
    pub(crate) runtime: Handle,
}

impl Intake {
    pub(crate) fn is_available(&self) -> bool {
        self.converter.is_available()
    }

    pub(crate) fn submit(&self, task: ConversionTask) -> TaskId {
        self.registry.register(&task);
        if !self.is_available() {
            return self.reject(&task);
        }
        self.pool.start(&self.runtime);
        self.batcher.submit(task)
    }

    pub(crate) fn submit_many(&self, tasks: Vec<ConversionTask>) -> Vec<TaskId> {
        for task in &tasks {
            self.registry.register(task);
        }
        if !self.is_available() {
            return tasks.iter().map(|t| self.reject(t)).collect();
        }
        self.pool.start(&self.runtime);
        self.batcher.submit_many(tasks)
    }

    fn reject(&self, task: &ConversionTask) -> TaskId {
        let message = tf_core::Error::ConverterUnavailable.to_string();
        tracing::warn!(task_id = %task.id, "Rejecting task: {message}");
        if let Some(status) = self.registry.fail(task.id, message) {
            task.notify(&status);
        }
        task.id
    }
}
