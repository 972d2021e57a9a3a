use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn vidingest(base: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("vidingest").unwrap();
    cmd.env("VIDINGEST_BASE_DIR", base)
        .env("VIDINGEST_TEST_MODE", "0")
        .env_remove("VIDINGEST_CONFIG")
        .env_remove("VIDINGEST_ANALYSIS_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("vidingest")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("quarantine"))
        .stdout(predicate::str::contains("bitrate"));
}

#[test]
fn test_init_creates_layout() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("data");

    vidingest(&base)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("quarantine"));

    for subdir in ["uploads", "processing", "processed", "quarantine", "temp"] {
        assert!(base.join(subdir).is_dir(), "{} missing", subdir);
    }
}

#[test]
fn test_quarantine_list_and_cleanup_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("data");

    vidingest(&base)
        .args(["quarantine", "list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    vidingest(&base)
        .args(["quarantine", "cleanup", "--max-age-days", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 file(s) older than 7 day(s)"));
}

#[test]
fn test_process_requires_api_key() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("data");

    vidingest(&base)
        .env("VIDINGEST_TEST_MODE", "1")
        .args(["process", "clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("VIDINGEST_ANALYSIS_API_KEY"));
}

#[test]
fn test_bitrate_in_test_mode() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("clip.mp4");
    fs::write(&file, vec![0u8; 7_500]).unwrap();

    vidingest(&dir.path().join("data"))
        .env("VIDINGEST_TEST_MODE", "true")
        .arg("bitrate")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("1.0 kbit/s"));
}

#[test]
fn test_invalid_jobs_value_is_rejected() {
    let dir = TempDir::new().unwrap();
    vidingest(&dir.path().join("data"))
        .args(["process", "clip.mp4", "--jobs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--jobs"));
}

#[test]
fn test_bad_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("vidingest.toml");
    fs::write(&config, "[remote]\nchunk_size = 0\n").unwrap();

    vidingest(&dir.path().join("data"))
        .arg("--config")
        .arg(&config)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("chunk_size must be positive"));
}
