//! Texture sources: the host-side handle a task converts from.
//!
//! The pipeline never inspects pixels. It only asks a source to serialize
//! itself to a PNG file at a staging path, which it does on a blocking
//! thread.

use std::fmt;
use std::path::{Path, PathBuf};

use image::ImageFormat;

/// Something that can write itself to disk as a PNG.
///
/// Implementations run on a blocking thread and must be safe to call from
/// any thread. An error fails only the task that owns this source.
pub trait TextureSource: Send + Sync + fmt::Debug {
    /// Human-readable name (used for logging and Remix naming).
    fn name(&self) -> &str;

    /// Write the image as PNG to `path`.
    fn save(&self, path: &Path) -> tf_core::Result<()>;
}

// ---------------------------------------------------------------------------
// ImageFileSource
// ---------------------------------------------------------------------------

/// A source image on disk in any format the `image` crate decodes.
///
/// PNG files are copied byte-for-byte; anything else is decoded and
/// re-encoded.
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    path: PathBuf,
    name: String,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_png(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("png"))
    }
}

impl TextureSource for ImageFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn save(&self, path: &Path) -> tf_core::Result<()> {
        if self.is_png() {
            std::fs::copy(&self.path, path).map_err(|e| {
                tf_core::Error::stage(&self.name, format!("copy failed: {e}"))
            })?;
            return Ok(());
        }

        let img = image::open(&self.path)
            .map_err(|e| tf_core::Error::stage(&self.name, format!("decode failed: {e}")))?;
        img.save_with_format(path, ImageFormat::Png)
            .map_err(|e| tf_core::Error::stage(&self.name, format!("encode failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// BytesSource
// ---------------------------------------------------------------------------

/// Already-encoded PNG bytes held in memory.
#[derive(Clone)]
pub struct BytesSource {
    name: String,
    bytes: Vec<u8>,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

impl fmt::Debug for BytesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesSource")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl TextureSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn save(&self, path: &Path) -> tf_core::Result<()> {
        std::fs::write(path, &self.bytes)
            .map_err(|e| tf_core::Error::stage(&self.name, format!("write failed: {e}")))
    }
}
