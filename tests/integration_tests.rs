//! Integration tests for the gitvault CLI.
//! These tests run the actual binary and never reach the network.

mod common;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use common::gitvault;

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    let output = gitvault(home.path()).arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("config"));
    assert!(stdout.contains("--noauth"));
    assert!(stdout.contains("--thread"));
    assert!(stdout.contains("--output-dir"));
    assert!(stdout.contains("--no-gists"));
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    let output = gitvault(home.path()).arg("--version").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("gitvault"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_command() {
    let home = TempDir::new().unwrap();
    let output = gitvault(home.path()).arg("definitely-not-a-command").output().unwrap();

    assert!(!output.status.success());
}

#[test]
fn test_noauth_requires_username() {
    let home = TempDir::new().unwrap();
    let output = gitvault(home.path()).arg("--noauth").output().unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("username"));
}

#[test]
fn test_token_mode_requires_token() {
    let home = TempDir::new().unwrap();
    let output = gitvault(home.path()).output().unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GITHUB_TOKEN"));
}

#[test]
fn test_invalid_config_file() {
    let home = TempDir::new().unwrap();
    let config = home.child("broken.yml");
    config.write_str("concurrency: [not, a, number\n").unwrap();

    let output = gitvault(home.path())
        .args(["--config", config.path().to_str().unwrap(), "config"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"));
}

#[test]
fn test_invalid_env_value() {
    let home = TempDir::new().unwrap();
    let output = gitvault(home.path())
        .env("GITVAULT_THREADS", "lots")
        .arg("config")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GITVAULT_THREADS"));
}

#[test]
fn test_config_command_redacts_token() {
    let home = TempDir::new().unwrap();
    let output = gitvault(home.path())
        .env("GITHUB_TOKEN", "ghp_supersecret")
        .args(["config", "--thread", "7"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[REDACTED]"));
    assert!(!stdout.contains("ghp_supersecret"));
    assert!(stdout.contains("concurrency:      7"));
}

#[test]
#[cfg(target_os = "linux")]
fn test_config_file_is_layered_under_flags() {
    let home = TempDir::new().unwrap();
    home.child("gitvault/config.yml")
        .write_str("noauth: true\nusername: alice\ninclude_gists: true\n")
        .unwrap();

    let output = gitvault(home.path())
        .args(["config", "--no-gists", "--output-dir", "/srv/backups"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mode:             anonymous"));
    assert!(stdout.contains("username:         alice"));
    assert!(stdout.contains("include_gists:    false"));
    assert!(stdout.contains("output_directory: /srv/backups"));
    assert!(!stdout.contains("⚠️"));
}
