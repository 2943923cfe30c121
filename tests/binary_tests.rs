//! Integration tests for the sql-gate binary.

use std::io::Write;

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::*;
use tempfile::{NamedTempFile, TempDir};

/// Command isolated from any user or working-directory config.
fn cmd(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("sql-gate");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("SQL_GATE_AUDIT_DB", home.path().join("audit.db"))
        .env_remove("SQL_GATE_DSN")
        .env_remove("SQL_GATE_PROVENANCE_DSN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_lint_passes() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args([
            "lint",
            "--sql",
            "SELECT * FROM items LIMIT 2;",
            "--allow",
            "items",
            "--no-color"
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("SELECT * FROM items LIMIT 2"))
        .stdout(predicate::str::contains("passed"));
}

#[test]
fn test_lint_unknown_table_exits_2() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["lint", "--sql", "SELECT * FROM nope", "--allow", "items", "--no-color"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("unknown_table:nope"));
}

#[test]
fn test_lint_catalog_schema_exits_2() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["lint", "--sql", "SELECT * FROM pg_catalog.pg_class", "--no-color"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("blocked_schema"));
}

#[test]
fn test_lint_file_json() {
    let home = TempDir::new().unwrap();
    let mut queries = NamedTempFile::new().unwrap();
    writeln!(queries, "SELECT id FROM items;\nDELETE FROM items;").unwrap();

    cmd(&home)
        .args([
            "lint",
            "--file",
            queries.path().to_str().unwrap(),
            "-f",
            "json"
        ])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("forbidden_keyword:DELETE"))
        .stdout(predicate::str::contains("\"index\": 1"));
}

#[test]
fn test_lint_stdin() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["lint", "--file", "-", "--no-color"])
        .write_stdin("SELECT name FROM items")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tables: items"));
}

#[test]
fn test_lint_file_not_found() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["lint", "--file", "/nonexistent/queries.sql"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_validate_without_dsn_fails() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["validate", "--sql", "SELECT 1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_history_empty_log() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["history", "recent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No audit events"));
}

#[test]
fn test_history_show_missing_event() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .args(["history", "show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_help() {
    let home = TempDir::new().unwrap();
    cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("approve"));
}
