//! Converter discovery.
//!
//! The [`ConverterLocator`] resolves the texture converter executable once,
//! from an explicit configured path or by searching `PATH`, and reports its
//! availability for `check-tools` style diagnostics.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tf_core::config::ConverterConfig;

/// Executable names searched on `PATH`, in order.
const CANDIDATE_NAMES: &[&str] = &["texconv", "texconv.exe"];

/// Availability information for the converter, returned by
/// [`ConverterLocator::check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first banner line), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Resolved location of the converter executable.
#[derive(Debug, Clone)]
pub struct ConverterLocator {
    path: Option<PathBuf>,
}

impl ConverterLocator {
    /// Resolve the converter.
    ///
    /// If `config.path` is set **and** exists it is used directly. Otherwise
    /// [`which::which`] searches `PATH` for each candidate name. A converter
    /// that cannot be found leaves the locator empty; callers check
    /// [`is_available`](Self::is_available).
    pub fn discover(config: &ConverterConfig) -> Self {
        let configured = config.path.as_deref().filter(|p| p.exists());
        if let Some(p) = config.path.as_deref() {
            if configured.is_none() {
                tracing::warn!(
                    "Configured converter {} does not exist; searching PATH",
                    p.display()
                );
            }
        }

        let path = configured
            .map(Path::to_path_buf)
            .or_else(|| CANDIDATE_NAMES.iter().find_map(|n| which::which(n).ok()));

        match &path {
            Some(p) => tracing::debug!("Using converter at {}", p.display()),
            None => tracing::debug!("No texture converter found"),
        }

        Self { path }
    }

    /// A locator pointing at a known executable. Used by tests and by hosts
    /// that bundle their own converter.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A locator with no converter.
    pub fn missing() -> Self {
        Self { path: None }
    }

    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Return the resolved path or [`tf_core::Error::ConverterUnavailable`].
    pub fn require(&self) -> tf_core::Result<&Path> {
        self.path().ok_or(tf_core::Error::ConverterUnavailable)
    }

    /// Report availability, path, and version.
    pub fn check(&self) -> ToolInfo {
        match &self.path {
            Some(path) => ToolInfo {
                name: tool_name(path),
                available: true,
                version: detect_version(path),
                path: Some(path.clone()),
            },
            None => ToolInfo {
                name: CANDIDATE_NAMES[0].to_string(),
                available: false,
                version: None,
                path: None,
            },
        }
    }
}

fn tool_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| CANDIDATE_NAMES[0].to_string())
}

/// Run the converter without arguments and return the first non-empty line
/// of its banner. The converter prints usage and exits non-zero in this mode,
/// so the exit status is ignored.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .stdin(std::process::Stdio::null())
        .output()
        .ok()?;

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|s| s.to_string())
}
