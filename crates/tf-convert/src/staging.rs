//! Temporary staging of converter inputs.
//!
//! A [`StagingArea`] owns a private temporary directory. Every staged input
//! gets a unique file name so concurrent groups (even groups targeting the
//! same final output path) never collide, and the converter's output for an
//! input is predictable from that name. The directory and everything in it is
//! removed when the area is closed or dropped.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tf_core::TaskId;

/// Prefix for staged file names.
const STAGE_PREFIX: &str = "tf";

/// Temporary directory holding staged converter inputs.
///
/// # Example
///
/// ```no_run
/// use tf_convert::StagingArea;
/// use tf_core::TaskId;
///
/// let staging = StagingArea::new().unwrap();
/// let input = staging.stage_path(TaskId::next(), "png");
/// // ... write the image to `input` and run the converter ...
/// staging.close();
/// ```
pub struct StagingArea {
    temp_dir: TempDir,
}

impl StagingArea {
    /// Create a new staging directory under the system temp dir.
    pub fn new() -> tf_core::Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("texforge-")
            .tempdir()
            .map_err(|e| tf_core::Error::Internal(format!("failed to create temp dir: {e}")))?;
        Ok(Self { temp_dir })
    }

    /// Path to the staging directory.
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A fresh, unique path for a task's staged input.
    pub fn stage_path(&self, task: TaskId, extension: &str) -> PathBuf {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        self.temp_dir
            .path()
            .join(format!("{STAGE_PREFIX}_{task}_{}.{extension}", &unique[..12]))
    }

    /// Remove the directory and everything staged in it.
    ///
    /// Failures are logged, never returned: cleanup must not change the
    /// outcome of a conversion.
    pub fn close(self) {
        let dir = self.temp_dir.path().to_path_buf();
        if let Err(e) = self.temp_dir.close() {
            tracing::warn!("Failed to remove staging dir {}: {e}", dir.display());
        }
    }
}

/// Where the converter writes its output for `staged_input`: the staged file
/// stem with the container extension, inside `output_dir`.
pub fn converter_output_path(output_dir: &Path, staged_input: &Path, extension: &str) -> PathBuf {
    let stem = staged_input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| STAGE_PREFIX.to_string());
    output_dir.join(format!("{stem}.{extension}"))
}

/// Move a produced file onto its final path, replacing any existing file.
///
/// Tries a rename first (same filesystem), falling back to copy + remove.
pub fn finalize_output(produced: &Path, dest: &Path) -> tf_core::Result<()> {
    if !produced.exists() {
        return Err(tf_core::Error::not_found("output", produced.display()));
    }

    if let Err(_rename_err) = std::fs::rename(produced, dest) {
        std::fs::copy(produced, dest).map_err(|e| {
            tf_core::Error::Internal(format!(
                "failed to copy {} to {}: {e}",
                produced.display(),
                dest.display()
            ))
        })?;
        let _ = std::fs::remove_file(produced);
    }

    Ok(())
}

/// Best-effort removal of a file; a missing file is not an error.
pub fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
    }
}
