//! Integration tests for the pgroll CLI binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[allow(deprecated)]
fn pgroll_cmd() -> Command {
    Command::cargo_bin("pgroll").unwrap()
}

#[test]
fn test_help_command() {
    pgroll_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Zero-downtime schema migrations"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("complete"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_version_flag() {
    pgroll_cmd().arg("--version").assert().success();
}

#[test]
fn test_start_help() {
    pgroll_cmd()
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Begin a migration"));
}

#[test]
fn test_status_help() {
    pgroll_cmd()
        .args(["status", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--all"));
}

#[test]
fn test_start_requires_a_file() {
    pgroll_cmd().arg("start").assert().failure();
}

#[test]
fn test_invalid_command() {
    pgroll_cmd()
        .arg("invalid_command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_start_with_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    pgroll_cmd()
        .current_dir(temp_dir.path())
        .args(["start", "nonexistent.json"])
        .assert()
        .failure();
}

#[test]
fn test_start_without_database_url_fails_with_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let migration_path = temp_dir.path().join("add_column.json");
    std::fs::write(
        &migration_path,
        r#"{"name": "add_column", "operations": []}"#,
    )
    .unwrap();

    pgroll_cmd()
        .current_dir(temp_dir.path())
        .args(["start", migration_path.to_str().unwrap()])
        .env_remove("PGROLL_DATABASE_URL")
        .assert()
        .failure()
        .stderr(predicate::str::contains("database URL"));
}

#[test]
fn test_complete_requires_a_name() {
    pgroll_cmd().arg("complete").assert().failure();
}

#[test]
fn test_rollback_requires_a_name() {
    pgroll_cmd().arg("rollback").assert().failure();
}
