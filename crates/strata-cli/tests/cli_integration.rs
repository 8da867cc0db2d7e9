//! CLI subprocess integration tests.
//!
//! These tests invoke the `strata` binary against a config that selects the
//! in-memory dataset backend and the mock runtime, and verify exit codes and
//! JSON output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn strata_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_strata"));
    cmd.env_remove("STRATA_CONFIG");
    cmd.env("STRATA_LOG", "warn");
    cmd
}

/// An agent config rooted in `dir` with dry-run backends.
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("agent.toml");
    fs::write(
        &path,
        format!(
            r#"[agent]
dataset = "strata"
lxc_prefix = "{root}/lxc"
cache_dir = "{root}/cache"
lock_dir = "{root}/locks"
state_dir = "{root}/state"
lock_poll_ms = 20
datasets = "memory"
runtime = "mock"

[cdn]
url = "http://127.0.0.1:9"
template_download_url = "http://127.0.0.1:9/ipfs/{{ID}}"
"#,
            root = dir.display()
        ),
    )
    .unwrap();
    path
}

/// A self-rooted template archive with `config` and four deltas.
fn write_template_archive(dir: &Path) -> PathBuf {
    let staging = dir.join("staging");
    fs::create_dir_all(staging.join("deltas")).unwrap();
    fs::write(
        staging.join("config"),
        "lxc.uts.name = custom\n\
         subutai.template = custom\n\
         subutai.template.owner = me\n\
         subutai.template.version = 0.1.0\n\
         subutai.parent = custom\n\
         subutai.parent.owner = me\n\
         subutai.parent.version = 0.1.0\n",
    )
    .unwrap();
    for p in ["rootfs", "home", "var", "opt"] {
        fs::write(
            staging.join("deltas").join(format!("{p}.delta")),
            format!(r#"{{"from":"custom:me:0.1.0/{p}@now","to":"custom:me:0.1.0/{p}@now"}}"#),
        )
        .unwrap();
    }
    let archive = dir.join("custom.tar.gz");
    strata_store::pack_archive(&staging, &archive).unwrap();
    archive
}

#[test]
fn cli_version_exits_zero() {
    let output = strata_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("strata"), "{stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let output = strata_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["import", "export", "snapshot", "clone", "destroy", "supervise"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_completions_need_no_config() {
    let output = strata_bin()
        .args(["--config", "/nonexistent/agent.toml", "completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("strata"));
}

#[test]
fn cli_missing_explicit_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = strata_bin()
        .args(["--config"])
        .arg(dir.path().join("absent.toml"))
        .args(["snapshot", "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("config error"));
}

#[test]
fn cli_local_import_reports_installed_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let archive = write_template_archive(dir.path());

    let output = strata_bin()
        .arg("--config")
        .arg(&config)
        .args(["--json", "import", "--local"])
        .arg(&archive)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["template"], "custom:me:0.1.0");
    assert_eq!(json["installed"], serde_json::json!(["custom:me:0.1.0"]));
    assert!(dir.path().join("lxc/custom:me:0.1.0/config").is_file());
    assert!(archive.exists());
}

#[test]
fn cli_bad_reference_is_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = strata_bin()
        .arg("--config")
        .arg(&config)
        .args(["import", "base:1.0.0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_bad_partition_is_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = strata_bin()
        .arg("--config")
        .arg(&config)
        .args(["snapshot", "create", "web1", "boot", "x"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("validation error"));
}

#[test]
fn cli_partition_listing_needs_container() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = strata_bin()
        .arg("--config")
        .arg(&config)
        .args(["snapshot", "list", "--partition", "rootfs"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_snapshot_list_empty_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = strata_bin()
        .arg("--config")
        .arg(&config)
        .args(["--json", "snapshot", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json, serde_json::json!([]));
}

#[test]
fn cli_destroy_unknown_container_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = strata_bin()
        .arg("--config")
        .arg(&config)
        .args(["destroy", "ghost"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("container ghost not found"));
}

#[test]
fn cli_supervise_once_on_empty_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = strata_bin()
        .arg("--config")
        .arg(&config)
        .args(["--json", "supervise", "--once"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["checked"], 0);
}
