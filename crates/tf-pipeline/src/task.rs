//! Conversion tasks and the batches they travel in.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tf_convert::{ConversionRequest, TextureSource};
use tf_core::{TargetEncoding, TaskId, TaskStatus, TextureCategory};

/// Per-task completion hook.
///
/// Called once, from the worker that finished the task (or from the
/// submitting thread when the task is rejected up front), with the task's
/// final status.
pub type TaskCallback = Arc<dyn Fn(&TaskStatus) + Send + Sync>;

/// One texture to convert.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tf_convert::ImageFileSource;
/// use tf_core::{remix_output_path, TextureCategory};
/// use tf_pipeline::ConversionTask;
///
/// let source = Arc::new(ImageFileSource::new("brick_nrm.png"));
/// let output = remix_output_path("mod/textures".as_ref(), "brick", TextureCategory::Normal);
/// let task = ConversionTask::new(source, output, TextureCategory::Normal);
/// ```
#[derive(Clone)]
pub struct ConversionTask {
    pub id: TaskId,
    pub source: Arc<dyn TextureSource>,
    pub output_path: PathBuf,
    pub category: TextureCategory,
    /// Explicit encoding; `None` uses the category default.
    pub encoding: Option<TargetEncoding>,
    pub on_done: Option<TaskCallback>,
}

impl ConversionTask {
    /// Create a task with a freshly allocated id.
    pub fn new(
        source: Arc<dyn TextureSource>,
        output_path: impl Into<PathBuf>,
        category: TextureCategory,
    ) -> Self {
        Self {
            id: TaskId::next(),
            source,
            output_path: output_path.into(),
            category,
            encoding: None,
            on_done: None,
        }
    }

    /// Builder: convert with an explicit encoding.
    pub fn with_encoding(mut self, encoding: impl Into<TargetEncoding>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Builder: attach a completion hook.
    pub fn on_done(mut self, callback: impl Fn(&TaskStatus) + Send + Sync + 'static) -> Self {
        self.on_done = Some(Arc::new(callback));
        self
    }

    pub fn resolved_encoding(&self) -> TargetEncoding {
        self.encoding
            .clone()
            .unwrap_or_else(|| self.category.default_encoding())
    }

    /// The invoker's view of this task.
    pub fn request(&self) -> ConversionRequest {
        ConversionRequest {
            task_id: self.id,
            source: Arc::clone(&self.source),
            output_path: self.output_path.clone(),
            category: self.category,
            encoding: self.encoding.clone(),
        }
    }

    /// Run the completion hook, if any. A panicking hook is logged and
    /// swallowed so it cannot take a worker down with it.
    pub(crate) fn notify(&self, status: &TaskStatus) {
        let Some(callback) = &self.on_done else {
            return;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(status)));
        if result.is_err() {
            tracing::error!(task_id = %self.id, "Task completion callback panicked");
        }
    }
}

impl fmt::Debug for ConversionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionTask")
            .field("id", &self.id)
            .field("source", &self.source.name())
            .field("output_path", &self.output_path)
            .field("category", &self.category)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// Tasks flushed together. Membership is fixed once the batch exists.
#[derive(Debug)]
pub struct Batch {
    id: u64,
    tasks: Vec<ConversionTask>,
}

impl Batch {
    pub(crate) fn new(id: u64, tasks: Vec<ConversionTask>) -> Self {
        Self { id, tasks }
    }

    /// Sequence number assigned at dispatch.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[ConversionTask] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<ConversionTask> {
        self.tasks
    }
}
