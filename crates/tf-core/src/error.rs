//! Unified error type for the texforge pipeline.
//!
//! Every failure in the conversion path funnels into [`Error`]. Errors never
//! cross the worker boundary as values; workers render them to strings and
//! attach them to the affected tasks.

use std::fmt;
use std::time::Duration;

/// Unified error type covering all failure modes in texforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The external converter binary could not be located.
    #[error("converter not found")]
    ConverterUnavailable,

    /// A single task's source image could not be serialized to its staging
    /// file. Isolated to that task.
    #[error("Stage error [task {task}]: {message}")]
    Stage {
        /// Display form of the affected task id.
        task: String,
        /// Human-readable error description.
        message: String,
    },

    /// The converter exited non-zero, failed to spawn, or did not produce an
    /// expected output.
    #[error("Tool error [{tool}]: {message}")]
    Invocation {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description (usually captured stderr).
        message: String,
    },

    /// The converter was killed after exceeding its deadline.
    #[error("Tool error [{tool}]: timed out after {timeout:?}")]
    InvocationTimeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A caller's wait deadline elapsed. Task state is not altered.
    #[error("wait timed out after {waited:?}")]
    WaitTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "task", "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors (panicked workers, closed
    /// runtimes).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error fails every task of the FormatGroup it occurred in,
    /// as opposed to a single task.
    pub fn is_group_fatal(&self) -> bool {
        matches!(
            self,
            Error::Invocation { .. } | Error::InvocationTimeout { .. } | Error::ConverterUnavailable
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Stage`].
    pub fn stage(task: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::Stage {
            task: task.to_string(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Invocation`].
    pub fn invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
