//! Concurrency tests for the basal binary.
//!
//! These tests verify that multiple processes can safely append to and read
//! from the same event log (file locking).

use assert_cmd::Command;
use std::path::Path;
use std::thread;
use tempfile::TempDir;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("basal"));
    cmd.env("XDG_CONFIG_HOME", dir.join("config"));
    cmd
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[test]
fn test_concurrent_bolus_logging() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path().to_path_buf();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let root = root.clone();
            thread::spawn(move || {
                cli(&root)
                    .arg("log-bolus")
                    .arg("--data-dir")
                    .arg(&root)
                    .arg("--units")
                    .arg(format!("{}.0", i + 1))
                    .arg("--at")
                    .arg(format!("2024-03-01T10:{:02}:00Z", i))
                    .assert()
                    .success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("logging thread panicked");
    }

    let log = std::fs::read_to_string(root.join("events.jsonl")).expect("Failed to read log");
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 8, "Expected 8 boluses, got {}", lines.len());

    for line in lines {
        let parsed: serde_json::Value =
            serde_json::from_str(line).expect("every line should be complete JSON");
        assert_eq!(parsed["type"], "bolus");
    }
}

#[test]
fn test_reads_during_writes() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path().to_path_buf();

    let writer_root = root.clone();
    let writer = thread::spawn(move || {
        for i in 0..5 {
            cli(&writer_root)
                .arg("log-bolus")
                .arg("--data-dir")
                .arg(&writer_root)
                .arg("--units")
                .arg("1.0")
                .arg("--at")
                .arg(format!("2024-03-01T11:{:02}:00Z", i))
                .assert()
                .success();
        }
    });

    for _ in 0..5 {
        cli(&root)
            .arg("reconcile")
            .arg("--data-dir")
            .arg(&root)
            .assert()
            .success();
    }

    writer.join().expect("writer thread panicked");

    let output = cli(&root)
        .arg("reconcile")
        .arg("--data-dir")
        .arg(&root)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 5);
}
