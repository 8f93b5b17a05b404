//! `fanout check` run as a subprocess

use super::{config_file, TOPOLOGY};
use std::process::Command;

fn fanout() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fanout"))
}

#[test]
fn test_check_prints_topology() {
    let file = config_file(TOPOLOGY);

    let output = fanout()
        .args(["check", "--color", "false", "--log-level", "warn", "--config"])
        .arg(file.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("orders (visibility 30s, redrive to orders-dlq after 5)"), "{}", stdout);
    assert!(stdout.contains("audit (visibility 300s, max depth 1000)"), "{}", stdout);
    assert!(stdout.contains("order-events -> [orders, audit]"), "{}", stdout);
}

#[test]
fn test_check_fails_on_invalid_topology() {
    let file = config_file("[[queue]]\nname = \"orders\"\nvisibility_timeout_seconds = 0\n");

    let output = fanout()
        .args(["check", "--color", "false", "--config"])
        .arg(file.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("FATAL"), "{}", stderr);
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = fanout()
        .args(["check", "--config"])
        .arg(dir.path().join("absent.toml"))
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[test]
fn test_long_version_includes_build_metadata() {
    let output = fanout().arg("--version").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
