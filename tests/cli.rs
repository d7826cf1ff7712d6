//! Command-line behavior of the `nst` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn nst(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("nst").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("PORT")
        .env_remove("PROBE_COUNT")
        .env_remove("BIND_ADDRESS")
        .env_remove("SPEEDTEST_SERVER");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    nst(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    nst(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_probe_count_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    nst(&dir)
        .args(["--no-color", "serve", "--probe-count", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Probe count must be greater than 0"))
        .stderr(predicate::str::contains("Configuration help"));
}

#[test]
fn test_invalid_env_file_value_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "WAIT_TIMEOUT_SECONDS=soon\n").unwrap();
    nst(&dir)
        .env_remove("WAIT_TIMEOUT_SECONDS")
        .args(["--no-color", "serve"])
        .assert()
        .code(1);
}

#[test]
fn test_run_requires_server() {
    let dir = TempDir::new().unwrap();
    nst(&dir).arg("run").assert().failure().stderr(predicate::str::contains("--server"));
}

#[test]
fn test_run_rejects_bad_url() {
    let dir = TempDir::new().unwrap();
    nst(&dir)
        .args(["--no-color", "run", "--server", "not a url"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid server URL"));
}
