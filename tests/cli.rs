use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn base_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rpi-sync"));
    cmd.env_remove("RPI_SYNC_CONFIG")
        .env_remove("RPI_SYNC_PASSWORD")
        .env("RUST_LOG", "warn");
    cmd
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("deploy.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn help_lists_subcommands() {
    base_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("push"))
        .stdout(contains("show-config"));
}

#[test]
fn push_help_lists_flags() {
    base_cmd()
        .args(["push", "--help"])
        .assert()
        .success()
        .stdout(contains("--dry-run"))
        .stdout(contains("--exclude"))
        .stdout(contains("--strict"));
}

#[test]
fn missing_config_fails_with_message() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    base_cmd()
        .arg("--config")
        .arg(&missing)
        .arg("show-config")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("Failed to read config"));
}

#[test]
fn show_config_masks_password() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        &tmp,
        r#"
[host]
hostname = "raspberrypi.local"
username = "pi"
password = "hunter2"

[sync]
local_root = "/srv/src/app"
remote_root = "/home/pi/app"
"#,
    );
    base_cmd()
        .arg("--config")
        .arg(&path)
        .arg("show-config")
        .assert()
        .success()
        .stdout(contains("raspberrypi.local"))
        .stdout(contains("********"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        &tmp,
        r#"
[host]
hostname = ""
username = "pi"

[sync]
local_root = "/srv/src/app"
remote_root = "/home/pi/app"
"#,
    );
    base_cmd()
        .arg("--config")
        .arg(&path)
        .args(["push", "--dry-run"])
        .assert()
        .failure()
        .stderr(contains("host.hostname is empty"));
}

#[test]
fn config_without_local_root_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        &tmp,
        r#"
[host]
hostname = "raspberrypi.local"
username = "pi"

[sync]
remote_root = "/home/pi/app"
"#,
    );
    base_cmd()
        .arg("--config")
        .arg(&path)
        .arg("show-config")
        .assert()
        .failure()
        .stderr(contains("local_root"));
}

#[test]
fn push_refuses_to_upload_its_own_config() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        &tmp,
        r#"
[host]
hostname = "raspberrypi.local"
username = "pi"
password = "hunter2"

[sync]
local_root = "."
remote_root = "/home/pi/app"
"#,
    );
    base_cmd()
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&path)
        .args(["push", "--dry-run"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("would be uploaded"));
}

#[test]
fn push_rejects_empty_exclude_pattern() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        &tmp,
        r#"
[host]
hostname = "raspberrypi.local"
username = "pi"

[sync]
local_root = "/srv/src/app"
remote_root = "/home/pi/app"
"#,
    );
    base_cmd()
        .arg("--config")
        .arg(&path)
        .args(["push", "--dry-run", "--exclude", ""])
        .assert()
        .failure()
        .stderr(contains("--exclude"));
}
