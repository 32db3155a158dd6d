//! Drives `TexconvConverter` against shell-script stand-ins for texconv.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tf_convert::{
    BytesSource, ConversionRequest, ConverterInvoker, ConverterLocator, Outcome, TexconvConverter,
};
use tf_core::config::ConverterConfig;
use tf_core::{TaskId, TextureCategory};

/// Copies every input to `<out>/<stem>.dds`, logging its arguments.
const COPYING_SCRIPT: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/calls.log"
out=""
inputs=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -ft|-f|-m) shift 2 ;;
    -y|-nologo) shift ;;
    *) inputs="$inputs $1"; shift ;;
  esac
done
for i in $inputs; do
  cp "$i" "$out/$(basename "$i" .png).dds"
done
"#;

const FAILING_SCRIPT: &str = "#!/bin/sh\necho 'FAILED (80070057: invalid format)' >&2\nexit 1\n";

const HANGING_SCRIPT: &str = "#!/bin/sh\nsleep 30\n";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn requests(out: &Path, names: &[&str]) -> Vec<ConversionRequest> {
    names
        .iter()
        .map(|n| ConversionRequest {
            task_id: TaskId::next(),
            source: Arc::new(BytesSource::new(*n, n.as_bytes().to_vec())),
            output_path: out.join(format!("{n}.a.rtex.dds")),
            category: TextureCategory::BaseColor,
            encoding: None,
        })
        .collect()
}

fn invoker(script: PathBuf, config: ConverterConfig) -> ConverterInvoker {
    let converter = TexconvConverter::new(ConverterLocator::at(script));
    ConverterInvoker::new(Arc::new(converter), config)
}

// Scripts are written and run from a single test so no other test thread can
// fork while a script's write handle is open.
#[tokio::test(flavor = "current_thread")]
async fn texconv_process_lifecycle() {
    let tools = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    // Success: one process for the whole group, outputs moved into place.
    let copying = write_script(tools.path(), "texconv", COPYING_SCRIPT);
    let inv = invoker(copying, ConverterConfig::default());
    let reqs = requests(out.path(), &["brick", "stone", "moss"]);
    let outcomes = inv.convert_batch(&reqs).await;
    assert_eq!(outcomes, vec![Outcome::Converted; 3]);
    for r in &reqs {
        assert_eq!(
            std::fs::read_to_string(&r.output_path).unwrap(),
            r.source.name()
        );
    }
    let log = std::fs::read_to_string(tools.path().join("calls.log")).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("-f BC7_UNORM_SRGB -m 0 -y -nologo"), "{log}");

    // Idempotence: a second run finds every output and starts no process.
    let outcomes = inv.convert_batch(&reqs).await;
    assert_eq!(outcomes, vec![Outcome::AlreadyPresent; 3]);
    let log = std::fs::read_to_string(tools.path().join("calls.log")).unwrap();
    assert_eq!(log.lines().count(), 1);

    // Non-zero exit: every task in the group fails with the converter's stderr.
    let failing = write_script(tools.path(), "texconv-fail", FAILING_SCRIPT);
    let inv = invoker(failing, ConverterConfig::default());
    let reqs = requests(out.path(), &["bad1", "bad2"]);
    for outcome in inv.convert_batch(&reqs).await {
        assert!(outcome.is_group_failure());
        assert!(outcome.error().unwrap().contains("invalid format"));
    }

    // Timeout: the process is killed and the group fails.
    let hanging = write_script(tools.path(), "texconv-hang", HANGING_SCRIPT);
    let config = ConverterConfig {
        single_timeout_secs: 1,
        ..Default::default()
    };
    let inv = invoker(hanging, config);
    let reqs = requests(out.path(), &["slow"]);
    let started = std::time::Instant::now();
    let outcomes = inv.convert_batch(&reqs).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert!(outcomes[0].error().unwrap().contains("timed out"));
    assert!(!reqs[0].output_path.exists());
}
