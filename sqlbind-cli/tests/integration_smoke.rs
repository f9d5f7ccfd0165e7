//! Smoke tests to verify command wiring

use assert_cmd::Command;
use predicates::prelude::*;

fn sqlbind() -> Command {
    let mut cmd = Command::cargo_bin("sqlbind").unwrap();
    // Keep the developer's real settings out of the picture
    let home = tempfile::tempdir().unwrap();
    cmd.env("HOME", home.path())
        .env_remove("DB_DSN")
        .env_remove("DB_HOST");
    cmd
}

#[test]
fn test_top_level_help() {
    sqlbind()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("schema"))
        .stdout(predicate::str::contains("users"));
}

#[test]
fn test_serve_help() {
    sqlbind()
        .arg("serve")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Address to bind to"))
        .stdout(predicate::str::contains("--create-schema"));
}

#[test]
fn test_schema_help() {
    sqlbind()
        .arg("schema")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("drop"));
}

#[test]
fn test_users_get_help() {
    sqlbind()
        .arg("users")
        .arg("get")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("User id"));
}

#[test]
fn test_users_get_requires_id() {
    sqlbind().arg("users").arg("get").assert().failure();
}

#[test]
fn test_missing_config_file_fails() {
    sqlbind()
        .arg("schema")
        .arg("create")
        .arg("--config")
        .arg("/nonexistent/sqlbind.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_no_connection_settings_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    sqlbind()
        .current_dir(dir.path())
        .arg("users")
        .arg("get")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DB_DSN or DB_HOST"));
}
