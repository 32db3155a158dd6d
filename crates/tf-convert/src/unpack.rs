//! DDS back to PNG, for inspecting converted textures.

use std::path::{Path, PathBuf};

use tf_core::config::ConverterConfig;

use crate::invoker::{Converter, Invocation};
use crate::staging;

/// Container format unpacked textures are written as.
const UNPACK_FORMAT: &str = "png";

/// Unpack one DDS file to `output_png`, returning the written path.
///
/// The converter writes `<dds stem>.png` next to `output_png`; that file is
/// then renamed onto `output_png` if the names differ.
///
/// # Errors
///
/// - [`tf_core::Error::ConverterUnavailable`] if there is no converter.
/// - [`tf_core::Error::NotFound`] if `dds` does not exist.
/// - Invocation errors (non-zero exit, timeout, `"missing output"`).
pub async fn unpack_dds(
    converter: &dyn Converter,
    config: &ConverterConfig,
    dds: &Path,
    output_png: &Path,
) -> tf_core::Result<PathBuf> {
    if !converter.is_available() {
        return Err(tf_core::Error::ConverterUnavailable);
    }
    if !dds.exists() {
        return Err(tf_core::Error::not_found("texture", dds.display()));
    }

    let output_dir = match output_png.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&output_dir).await?;

    let invocation = Invocation {
        inputs: vec![dds.to_path_buf()],
        output_dir,
        container_format: UNPACK_FORMAT.into(),
        encoding: None,
        mip_levels: None,
        timeout: std::time::Duration::from_secs(config.unpack_timeout_secs),
    };

    converter.run(&invocation).await?;

    let produced = invocation.output_for(dds);
    if !produced.exists() {
        return Err(tf_core::Error::invocation(converter.name(), "missing output"));
    }
    if produced != output_png {
        staging::finalize_output(&produced, output_png)?;
    }

    tracing::debug!("Unpacked {} -> {}", dds.display(), output_png.display());
    Ok(output_png.to_path_buf())
}

/// Unpack several DDS files into `output_dir` in order.
///
/// `progress` receives `(index, total, message)` after each file, with a
/// 1-based index. One failure does not stop the rest; only the PNGs actually
/// written are returned.
pub async fn unpack_many<F>(
    converter: &dyn Converter,
    config: &ConverterConfig,
    files: &[PathBuf],
    output_dir: &Path,
    mut progress: F,
) -> Vec<PathBuf>
where
    F: FnMut(usize, usize, &str),
{
    let total = files.len();
    let mut produced = Vec::with_capacity(total);

    for (i, file) in files.iter().enumerate() {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "texture".to_string());
        let target = output_dir.join(format!("{stem}.{UNPACK_FORMAT}"));

        let message = match unpack_dds(converter, config, file, &target).await {
            Ok(path) => {
                let msg = format!("Unpacked {}", path.display());
                produced.push(path);
                msg
            }
            Err(e) => {
                tracing::warn!("Failed to unpack {}: {e}", file.display());
                format!("Failed to unpack {}: {e}", file.display())
            }
        };
        progress(i + 1, total, &message);
    }

    produced
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeUnpacker {
        args: Mutex<Vec<Vec<String>>>,
        produce_nothing: bool,
    }

    #[async_trait]
    impl Converter for FakeUnpacker {
        fn name(&self) -> &str {
            "fake"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, invocation: &Invocation) -> tf_core::Result<()> {
            self.args.lock().unwrap().push(invocation.to_args());
            for input in &invocation.inputs {
                if input.to_string_lossy().contains("corrupt") {
                    return Err(tf_core::Error::invocation("fake", "bad header"));
                }
                if !self.produce_nothing {
                    std::fs::write(invocation.output_for(input), b"png")?;
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn unpack_uses_png_args_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let dds = dir.path().join("brick.a.rtex.dds");
        std::fs::write(&dds, b"dds").unwrap();
        let out_dir = dir.path().join("unpacked");
        let target = out_dir.join("brick_preview.png");

        let fake = FakeUnpacker::default();
        let png = unpack_dds(&fake, &ConverterConfig::default(), &dds, &target)
            .await
            .unwrap();

        assert_eq!(png, target);
        assert!(target.exists());
        assert!(!out_dir.join("brick.a.rtex.png").exists());

        let args = fake.args.lock().unwrap();
        let expected: Vec<String> = vec![
            dds.to_string_lossy().into_owned(),
            "-o".into(),
            out_dir.to_string_lossy().into_owned(),
            "-ft".into(),
            "png".into(),
            "-y".into(),
            "-nologo".into(),
        ];
        assert_eq!(args[0], expected);
    }

    #[tokio::test]
    async fn unpack_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeUnpacker::default();
        let err = unpack_dds(
            &fake,
            &ConverterConfig::default(),
            &dir.path().join("gone.dds"),
            &dir.path().join("gone.png"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, tf_core::Error::NotFound { .. }));
        assert!(fake.args.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unpack_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let dds = dir.path().join("a.dds");
        std::fs::write(&dds, b"dds").unwrap();
        let fake = FakeUnpacker {
            produce_nothing: true,
            ..Default::default()
        };
        let err = unpack_dds(
            &fake,
            &ConverterConfig::default(),
            &dds,
            &dir.path().join("a.png"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("missing output"));
    }

    #[tokio::test]
    async fn unpack_many_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = ["a.dds", "corrupt.dds", "b.dds"]
            .iter()
            .map(|n| {
                let p = dir.path().join(n);
                std::fs::write(&p, b"dds").unwrap();
                p
            })
            .collect();
        let out = dir.path().join("png");

        let mut seen = Vec::new();
        let produced = unpack_many(
            &FakeUnpacker::default(),
            &ConverterConfig::default(),
            &files,
            &out,
            |index, total, message| seen.push((index, total, message.to_string())),
        )
        .await;

        assert_eq!(produced, vec![out.join("a.png"), out.join("b.png")]);
        assert_eq!(seen.len(), 3);
        assert_eq!((seen[1].0, seen[1].1), (2, 3));
        assert!(seen[1].2.contains("bad header"));
    }
}
