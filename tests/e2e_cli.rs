//! CLI end-to-end tests
//!
//! Tests for the texforge command-line interface that need no converter.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the texforge binary
#[allow(deprecated)]
fn texforge_cmd() -> Command {
    Command::cargo_bin("texforge").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    texforge_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    texforge_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("texforge"))
        .stdout(predicate::str::contains("convert"))
        .stdout(predicate::str::contains("unpack"));
}

#[test]
fn test_cli_version_command() {
    texforge_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "texforge {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_convert_help() {
    texforge_cmd()
        .args(["convert", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Convert images to DDS"))
        .stdout(predicate::str::contains("--background"));
}

#[test]
fn test_cli_check_tools_without_converter() {
    texforge_cmd()
        .arg("check-tools")
        .env("PATH", "")
        .assert()
        .success()
        .stdout(predicate::str::contains("✗ texconv"));
}

#[test]
fn test_cli_validate_defaults() {
    texforge_cmd()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("Batch size: 4"));
}

#[test]
fn test_cli_validate_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("texforge.json");
    fs::write(
        &path,
        r#"{"pipeline": {"batch_size": 8, "max_workers": 2}, "converter": {"mip_levels": 1}}"#,
    )
    .unwrap();

    texforge_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Batch size: 8"))
        .stdout(predicate::str::contains("1 mip levels"));
}

#[test]
fn test_cli_validate_reports_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("texforge.json");
    fs::write(&path, r#"{"pipeline": {"batch_size": 0}}"#).unwrap();

    texforge_cmd()
        .args(["--config"])
        .arg(&path)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Warnings"))
        .stdout(predicate::str::contains("batch_size is 0"));
}

#[test]
fn test_cli_validate_rejects_bad_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    texforge_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config error"));
}

#[test]
fn test_cli_convert_without_images_fails() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("readme.txt"), "not a texture").unwrap();

    texforge_cmd()
        .arg("convert")
        .arg(dir.path())
        .arg("-o")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No images found"));
}

#[test]
fn test_cli_convert_without_converter_fails() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("brick.png"), b"png").unwrap();

    texforge_cmd()
        .arg("convert")
        .arg(dir.path().join("brick.png"))
        .arg("-o")
        .arg(dir.path().join("out"))
        .env("PATH", "")
        .assert()
        .failure()
        .stderr(predicate::str::contains("texconv not found"));
}

#[test]
fn test_cli_convert_rejects_unknown_category() {
    let dir = tempdir().unwrap();
    texforge_cmd()
        .args(["convert", "--category", "sparkle", "-o"])
        .arg(dir.path())
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown texture category"));
}

#[test]
fn test_cli_unpack_without_dds_fails() {
    let dir = tempdir().unwrap();
    texforge_cmd()
        .arg("unpack")
        .arg(dir.path())
        .arg("-o")
        .arg(dir.path().join("png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No DDS files found"));
}
