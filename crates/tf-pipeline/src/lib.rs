//! tf-pipeline: batched, parallel texture conversion.
//!
//! Tasks submitted to a [`Pipeline`] are registered, grouped into batches by
//! the [`Batcher`] (flushed when full or after an idle timeout), queued on the
//! [`DispatchQueue`], and drained by a fixed-size [`WorkerPool`] that hands
//! each batch to the converter invoker. Background jobs run whole
//! submissions off the host thread and report back through structured events
//! the host drains with [`Pipeline::poll_jobs`].

pub mod batcher;
mod intake;
pub mod jobs;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod task;

pub use batcher::Batcher;
pub use jobs::BackgroundJobManager;
pub use pipeline::{Pipeline, PipelineStats, PollOutcome};
pub use pool::WorkerPool;
pub use queue::DispatchQueue;
pub use registry::TaskRegistry;
pub use task::{Batch, ConversionTask, TaskCallback};

// Commonly needed alongside the pipeline.
pub use tf_convert::{BytesSource, Converter, ImageFileSource, TextureSource};
pub use tf_core::events::{JobEvent, JobEventKind, JobSummary};
