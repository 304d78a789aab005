use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn serverdemon(work_dir: &Path) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("serverdemon").into();
    cmd.env_remove("SERVERDEMON_INCLUDE");
    cmd.env("NO_COLOR", "1");
    cmd.current_dir(work_dir);
    cmd.timeout(Duration::from_secs(30));
    cmd
}

fn write_server(dir: &Path, file: &str, body: &str) -> String {
    let path = dir.join(file);
    std::fs::write(&path, body).unwrap();
    path.display().to_string()
}

#[test]
fn test_e2e_check_lists_valid_servers() {
    let dir = TempDir::new().unwrap();
    let good = write_server(
        dir.path(),
        "good.toml",
        "SERVER_NAME = \"Terraria\"\nEXE_PATH = \"/bin/echo\"\nSERVER_ROOT = \"/tmp\"\nPORT = 7777\n",
    );
    let bad = write_server(
        dir.path(),
        "bad.toml",
        "SERVER_NAME = \"Broken\"\nEXE_PATH = \"/bin/echo\"\nSERVER_ROOT = \"/tmp\"\n",
    );
    let include = dir.path().join("include");
    std::fs::write(&include, format!("{good}\n{bad}\n")).unwrap();

    let output = serverdemon(dir.path())
        .arg("--include")
        .arg(&include)
        .arg("--check")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Terraria\tport 7777\t/bin/echo"), "got: {stdout}");
    assert!(stdout.contains("ERROR: value PORT has not been set"), "got: {stdout}");
    assert!(stdout.contains("Loaded 1 game server"), "got: {stdout}");

    let line = Regex::new(r"^\[ \d{2}:\d{2}:\d{2} \] ").unwrap();
    let first = stdout.lines().next().unwrap();
    assert!(line.is_match(first), "unexpected log line: {first}");
}

#[test]
fn test_e2e_no_servers_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let bad = write_server(
        dir.path(),
        "bad.toml",
        "EXE_PATH = \"/bin/echo\"\nPORT = 9001\n",
    );
    let include = dir.path().join("include");
    std::fs::write(&include, format!("{bad}\n")).unwrap();

    serverdemon(dir.path())
        .arg("--include")
        .arg(&include)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no server files were loaded"));
}

#[test]
fn test_e2e_missing_include_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    serverdemon(dir.path())
        .arg("--include")
        .arg(dir.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot find include file"));
}

#[test]
fn test_e2e_include_from_env() {
    let dir = TempDir::new().unwrap();
    let good = write_server(
        dir.path(),
        "good.toml",
        "SERVER_NAME = \"Factorio\"\nEXE_PATH = \"/bin/echo\"\nSERVER_ROOT = \"/tmp\"\nPORT = 34197\n",
    );
    let include = dir.path().join("include");
    std::fs::write(&include, format!("{good}\n")).unwrap();

    serverdemon(dir.path())
        .env("SERVERDEMON_INCLUDE", &include)
        .arg("--check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Factorio\tport 34197"));
}
