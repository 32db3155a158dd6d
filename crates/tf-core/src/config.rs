//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! converter, pipeline, and job sub-configs. Every section defaults sensibly
//! so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Upper bound on the default worker count.
const MAX_DEFAULT_WORKERS: usize = 8;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub converter: ConverterConfig,
    pub pipeline: PipelineConfig,
    pub jobs: JobConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| Error::Config(format!("parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, the file does not exist, or it cannot be parsed.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pipeline.batch_size == 0 {
            warnings.push("pipeline.batch_size is 0; batches of 1 will be used".into());
        }

        if let Some(workers) = self.pipeline.max_workers {
            if workers == 0 {
                warnings.push("pipeline.max_workers is 0; 1 worker will be used".into());
            } else if workers > num_cpus::get() {
                warnings.push(format!(
                    "pipeline.max_workers ({workers}) exceeds the {} available cores",
                    num_cpus::get()
                ));
            }
        }

        if self.converter.single_timeout_secs == 0 || self.converter.group_timeout_secs == 0 {
            warnings.push("converter timeouts of 0 will fail every invocation".into());
        }

        if self.converter.group_timeout_secs < self.converter.single_timeout_secs {
            warnings.push(
                "converter.group_timeout_secs is shorter than single_timeout_secs".into(),
            );
        }

        if let Some(ref path) = self.converter.path {
            if !path.exists() {
                warnings.push(format!(
                    "converter.path {} does not exist; PATH will be searched",
                    path.display()
                ));
            }
        }

        if self.jobs.event_capacity == 0 {
            warnings.push("jobs.event_capacity is 0; a capacity of 1 will be used".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// External converter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Explicit path to the converter. When unset or missing, `PATH` is
    /// searched.
    pub path: Option<PathBuf>,
    /// Container format passed to `-ft` (also the output file extension).
    pub container_format: String,
    /// Mip levels passed to `-m`; `0` generates the full chain.
    pub mip_levels: u32,
    /// Deadline for an invocation covering more than one input.
    pub group_timeout_secs: u64,
    /// Deadline for an invocation covering a single input.
    pub single_timeout_secs: u64,
    /// Deadline for a DDS to PNG unpack.
    pub unpack_timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            path: None,
            container_format: "dds".into(),
            mip_levels: 0,
            group_timeout_secs: 120,
            single_timeout_secs: 60,
            unpack_timeout_secs: 30,
        }
    }
}

impl ConverterConfig {
    /// Deadline for an invocation with `inputs` staged files.
    pub fn timeout_for(&self, inputs: usize) -> Duration {
        if inputs > 1 {
            Duration::from_secs(self.group_timeout_secs)
        } else {
            Duration::from_secs(self.single_timeout_secs)
        }
    }
}

/// Batching and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tasks per batch before an immediate flush.
    pub batch_size: usize,
    /// Idle time after the last arrival before a partial batch is flushed.
    pub batch_timeout_ms: u64,
    /// Worker count; defaults to `min(cores, 8)`.
    pub max_workers: Option<usize>,
    /// How long an idle worker waits for a batch before re-checking for stop.
    pub dequeue_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            batch_timeout_ms: 500,
            max_workers: None,
            dequeue_timeout_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Resolved worker count, never zero.
    pub fn effective_workers(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| num_cpus::get().min(MAX_DEFAULT_WORKERS))
            .max(1)
    }

    /// Resolved batch size, never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

/// Background job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Capacity of the job event channel drained by the host.
    pub event_capacity: usize,
    /// Suggested cadence for the host's recurring poll callback.
    pub poll_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            poll_interval_ms: 100,
        }
    }
}

impl JobConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
