//! Input discovery for the CLI.
//!
//! Expands the file and directory arguments into a sorted list of texture
//! files, and turns source images into conversion tasks with Remix-style
//! output names.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tf_convert::ImageFileSource;
use tf_core::{remix_output_path, TextureCategory};
use tf_pipeline::ConversionTask;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Source image extensions the converter pipeline accepts.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tga", "bmp", "tif", "tiff"];

/// Extensions accepted by `unpack`.
pub const DDS_EXTENSIONS: &[&str] = &["dds"];

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Collect every file under `inputs` whose extension is in `extensions`.
///
/// Files named directly are taken as-is when their extension matches;
/// directories are walked recursively. Missing paths are logged and skipped.
/// The result is sorted and free of duplicates.
pub fn collect_files(inputs: &[PathBuf], extensions: &[&str]) -> Vec<PathBuf> {
    let mut found = BTreeSet::new();

    for input in inputs {
        if input.is_file() {
            if has_extension(input, extensions) {
                found.insert(input.clone());
            } else {
                debug!("Skipping {:?}: unsupported extension", input);
            }
            continue;
        }
        if !input.is_dir() {
            warn!("Input does not exist: {:?}", input);
            continue;
        }

        for entry in WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && has_extension(path, extensions) {
                found.insert(path.to_path_buf());
            }
        }
    }

    found.into_iter().collect()
}

/// Build one task per image, writing into `output_dir`.
///
/// The category is `category` when given, otherwise inferred from the file
/// name. `encoding` overrides the category default for every task.
pub fn plan_tasks(
    images: &[PathBuf],
    output_dir: &Path,
    category: Option<TextureCategory>,
    encoding: Option<&str>,
) -> Vec<ConversionTask> {
    images
        .iter()
        .map(|image| {
            let name = image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let category = category.unwrap_or_else(|| TextureCategory::infer(&name));
            let output = remix_output_path(output_dir, &name, category);
            let task = ConversionTask::new(Arc::new(ImageFileSource::new(image)), output, category);
            match encoding {
                Some(enc) => task.with_encoding(enc),
                None => task,
            }
        })
        .collect()
}
