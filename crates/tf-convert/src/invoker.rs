//! Batch conversion through the external converter.
//!
//! A batch is partitioned into [`FormatGroup`]s, the tasks sharing an output
//! directory and target encoding. Each group costs exactly one converter
//! process regardless of its size:
//!
//! 1. tasks whose output already exists are reported [`Outcome::AlreadyPresent`]
//!    and never staged;
//! 2. the rest are serialized to uniquely named staging files (a failure here
//!    fails only that task);
//! 3. one invocation converts all staged inputs into the output directory;
//! 4. each converter output is moved onto its task's final path, and a task
//!    whose output is missing fails with `"missing output"`.
//!
//! A non-zero exit or timeout fails every staged task of the group. Staging
//! files are removed whatever happens.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tf_core::config::ConverterConfig;
use tf_core::{TargetEncoding, TaskId, TextureCategory};

use crate::command::ToolCommand;
use crate::source::TextureSource;
use crate::staging::{self, StagingArea};
use crate::tools::ConverterLocator;

/// Error attached to a task whose converter output never appeared.
const MISSING_OUTPUT: &str = "missing output";

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Everything the invoker needs to convert one task.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub task_id: TaskId,
    pub source: Arc<dyn TextureSource>,
    pub output_path: PathBuf,
    pub category: TextureCategory,
    /// Explicit encoding; `None` uses the category default.
    pub encoding: Option<TargetEncoding>,
}

impl ConversionRequest {
    /// The encoding this task will be converted with.
    pub fn resolved_encoding(&self) -> TargetEncoding {
        self.encoding
            .clone()
            .unwrap_or_else(|| self.category.default_encoding())
    }

    /// Directory the output lands in.
    pub fn output_dir(&self) -> PathBuf {
        match self.output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Result of converting a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The converter produced the output and it was moved into place.
    Converted,
    /// The output existed before the batch ran; nothing was done.
    AlreadyPresent,
    Failed {
        message: String,
        /// The whole group's invocation failed, not just this task.
        group_wide: bool,
    },
}

impl Outcome {
    fn task_failure(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            group_wide: false,
        }
    }

    fn group_failure(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            group_wide: true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Converted | Self::AlreadyPresent)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_group_failure(&self) -> bool {
        matches!(self, Self::Failed { group_wide: true, .. })
    }
}

// ---------------------------------------------------------------------------
// Format groups
// ---------------------------------------------------------------------------

/// Tasks of one batch sharing an output directory and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatGroup {
    pub output_dir: PathBuf,
    pub encoding: TargetEncoding,
    /// Indices into the batch, in batch order.
    pub members: Vec<usize>,
}

/// Partition a batch into format groups, ordered by first appearance.
pub fn group_requests(requests: &[ConversionRequest]) -> Vec<FormatGroup> {
    let mut groups: Vec<FormatGroup> = Vec::new();
    for (idx, req) in requests.iter().enumerate() {
        let dir = req.output_dir();
        let encoding = req.resolved_encoding();
        match groups
            .iter_mut()
            .find(|g| g.output_dir == dir && g.encoding == encoding)
        {
            Some(group) => group.members.push(idx),
            None => groups.push(FormatGroup {
                output_dir: dir,
                encoding,
                members: vec![idx],
            }),
        }
    }
    groups
}

// ---------------------------------------------------------------------------
// Converter seam
// ---------------------------------------------------------------------------

/// One converter process: every input is converted into `output_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    /// Container format for `-ft`; also the output file extension.
    pub container_format: String,
    /// Pixel format for `-f`; omitted when unpacking.
    pub encoding: Option<TargetEncoding>,
    /// Mip count for `-m`; omitted when unpacking.
    pub mip_levels: Option<u32>,
    pub timeout: Duration,
}

impl Invocation {
    /// Command line in the converter's argument order:
    /// `<inputs...> -o <dir> -ft <fmt> [-f <enc>] [-m <n>] -y -nologo`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .inputs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        args.push("-o".into());
        args.push(self.output_dir.to_string_lossy().into_owned());
        args.push("-ft".into());
        args.push(self.container_format.clone());
        if let Some(enc) = &self.encoding {
            args.push("-f".into());
            args.push(enc.as_str().to_string());
        }
        if let Some(mips) = self.mip_levels {
            args.push("-m".into());
            args.push(mips.to_string());
        }
        args.push("-y".into());
        args.push("-nologo".into());
        args
    }

    /// Where the converter writes its output for `input`.
    pub fn output_for(&self, input: &Path) -> PathBuf {
        staging::converter_output_path(&self.output_dir, input, &self.container_format)
    }
}

/// An external process that turns staged images into encoded textures.
///
/// [`TexconvConverter`] is the production implementation; tests substitute
/// fakes that write outputs directly.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether the converter can be invoked at all.
    fn is_available(&self) -> bool;

    /// Run one invocation to completion, honouring its timeout.
    async fn run(&self, invocation: &Invocation) -> tf_core::Result<()>;
}

/// The DirectXTex `texconv` command-line converter.
#[derive(Debug, Clone)]
pub struct TexconvConverter {
    locator: ConverterLocator,
}

impl TexconvConverter {
    pub fn new(locator: ConverterLocator) -> Self {
        Self { locator }
    }

    /// Locate the converter from config or `PATH`.
    pub fn discover(config: &ConverterConfig) -> Self {
        Self::new(ConverterLocator::discover(config))
    }

    pub fn locator(&self) -> &ConverterLocator {
        &self.locator
    }
}

#[async_trait]
impl Converter for TexconvConverter {
    fn name(&self) -> &str {
        "texconv"
    }

    fn is_available(&self) -> bool {
        self.locator.is_available()
    }

    async fn run(&self, invocation: &Invocation) -> tf_core::Result<()> {
        let path = self.locator.require()?;
        let output = ToolCommand::new(path.to_path_buf())
            .args(invocation.to_args())
            .timeout(invocation.timeout)
            .execute()
            .await?;
        tracing::trace!(stdout = %output.stdout.trim(), "texconv finished");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Counters shared with the pipeline's stats.
#[derive(Debug, Default)]
pub struct InvokerStats {
    invocations: AtomicU64,
    skipped_existing: AtomicU64,
}

impl InvokerStats {
    /// Converter processes started.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Tasks satisfied by an output that already existed.
    pub fn skipped_existing(&self) -> u64 {
        self.skipped_existing.load(Ordering::Relaxed)
    }
}

/// Converts batches through a [`Converter`].
pub struct ConverterInvoker {
    converter: Arc<dyn Converter>,
    config: ConverterConfig,
    stats: Arc<InvokerStats>,
}

impl ConverterInvoker {
    pub fn new(converter: Arc<dyn Converter>, config: ConverterConfig) -> Self {
        Self {
            converter,
            config,
            stats: Arc::new(InvokerStats::default()),
        }
    }

    pub fn converter(&self) -> &Arc<dyn Converter> {
        &self.converter
    }

    pub fn stats(&self) -> &Arc<InvokerStats> {
        &self.stats
    }

    /// Convert a batch. Returns one outcome per request, in request order.
    pub async fn convert_batch(&self, requests: &[ConversionRequest]) -> Vec<Outcome> {
        let mut outcomes: Vec<Option<Outcome>> = vec![None; requests.len()];

        for group in group_requests(requests) {
            for (idx, outcome) in self.convert_group(requests, &group).await {
                outcomes[idx] = Some(outcome);
            }
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Outcome::task_failure("no outcome recorded")))
            .collect()
    }

    /// Convert one format group with at most one converter invocation.
    pub async fn convert_group(
        &self,
        requests: &[ConversionRequest],
        group: &FormatGroup,
    ) -> Vec<(usize, Outcome)> {
        let mut results = Vec::with_capacity(group.members.len());

        if !self.converter.is_available() {
            let message = tf_core::Error::ConverterUnavailable.to_string();
            return group
                .members
                .iter()
                .map(|&i| (i, Outcome::group_failure(message.clone())))
                .collect();
        }

        if let Err(e) = tokio::fs::create_dir_all(&group.output_dir).await {
            let message = format!(
                "cannot create output directory {}: {e}",
                group.output_dir.display()
            );
            tracing::warn!("{message}");
            return group
                .members
                .iter()
                .map(|&i| (i, Outcome::group_failure(message.clone())))
                .collect();
        }

        // Idempotence: existing outputs are never reconverted.
        let mut pending = Vec::new();
        for &idx in &group.members {
            let req = &requests[idx];
            if req.output_path.exists() {
                tracing::debug!(
                    task_id = %req.task_id,
                    "Output {} already exists; skipping",
                    req.output_path.display()
                );
                self.stats.skipped_existing.fetch_add(1, Ordering::Relaxed);
                results.push((idx, Outcome::AlreadyPresent));
            } else {
                pending.push(idx);
            }
        }

        if pending.is_empty() {
            return results;
        }

        let staging_area = match StagingArea::new() {
            Ok(s) => s,
            Err(e) => {
                let message = e.to_string();
                results.extend(
                    pending
                        .into_iter()
                        .map(|i| (i, Outcome::group_failure(message.clone()))),
                );
                return results;
            }
        };

        let staged = self
            .stage_inputs(&staging_area, requests, &pending, &mut results)
            .await;

        if !staged.is_empty() {
            let invocation = Invocation {
                inputs: staged.iter().map(|(_, p)| p.clone()).collect(),
                output_dir: group.output_dir.clone(),
                container_format: self.config.container_format.to_lowercase(),
                encoding: Some(group.encoding.clone()),
                mip_levels: Some(self.config.mip_levels),
                timeout: self.config.timeout_for(staged.len()),
            };

            tracing::info!(
                converter = self.converter.name(),
                inputs = staged.len(),
                encoding = %group.encoding,
                "Converting group into {}",
                group.output_dir.display()
            );
            self.stats.invocations.fetch_add(1, Ordering::Relaxed);

            match self.converter.run(&invocation).await {
                Ok(()) => {
                    for (idx, input) in &staged {
                        let req = &requests[*idx];
                        let produced = invocation.output_for(input);
                        let outcome = if !produced.exists() {
                            tracing::warn!(task_id = %req.task_id, "Converter produced no output");
                            Outcome::task_failure(MISSING_OUTPUT)
                        } else {
                            match staging::finalize_output(&produced, &req.output_path) {
                                Ok(()) => Outcome::Converted,
                                Err(e) => Outcome::task_failure(e.to_string()),
                            }
                        };
                        results.push((*idx, outcome));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        inputs = staged.len(),
                        "Converter invocation failed: {e}"
                    );
                    let message = e.to_string();
                    for (idx, input) in &staged {
                        // Partial outputs from a failed run are never moved into place.
                        staging::remove_quietly(&invocation.output_for(input));
                        results.push((*idx, Outcome::group_failure(message.clone())));
                    }
                }
            }
        }

        staging_area.close();
        results
    }

    /// Serialize each pending task's source to a staging file. Tasks whose
    /// staging fails get a failure outcome pushed to `results` and are left
    /// out of the returned list.
    async fn stage_inputs(
        &self,
        staging_area: &StagingArea,
        requests: &[ConversionRequest],
        pending: &[usize],
        results: &mut Vec<(usize, Outcome)>,
    ) -> Vec<(usize, PathBuf)> {
        let jobs = pending.iter().map(|&idx| {
            let req = &requests[idx];
            let path = staging_area.stage_path(req.task_id, "png");
            let source = Arc::clone(&req.source);
            let task_id = req.task_id;
            async move {
                let target = path.clone();
                let saved = tokio::task::spawn_blocking(move || source.save(&target)).await;
                let result = match saved {
                    Ok(Ok(())) => Ok(path),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(join_err) => {
                        Err(tf_core::Error::stage(task_id, format!("serializer panicked: {join_err}"))
                            .to_string())
                    }
                };
                (idx, result)
            }
        });

        let mut staged = Vec::with_capacity(pending.len());
        for (idx, result) in futures::future::join_all(jobs).await {
            match result {
                Ok(path) => staged.push((idx, path)),
                Err(message) => {
                    tracing::warn!(task_id = %requests[idx].task_id, "Staging failed: {message}");
                    results.push((idx, Outcome::task_failure(message)));
                }
            }
        }
        staged
    }
}
