mod common;

use assert_fs::{fixture::PathChild, TempDir};
use common::{TestEnvironment, STARFEED_ENV_VARS};
use std::path::Path;
use std::process::{Command, Output};

/// Run the binary with STARFEED_* variables cleared
fn starfeed(args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_starfeed"));
    for var in STARFEED_ENV_VARS {
        command.env_remove(var);
    }
    command
        .args(args)
        .output()
        .expect("Failed to execute starfeed")
}

fn with_config(config: &Path, args: &[&str]) -> Output {
    let config = config.to_str().expect("config path is UTF-8");
    let mut full_args = vec!["--config", config];
    full_args.extend_from_slice(args);
    starfeed(&full_args)
}

#[test]
fn test_cli_help() {
    let output = starfeed(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("GitHub stars"));
    assert!(stdout.contains("sync"));
    assert!(stdout.contains("subscriptions"));
    assert!(stdout.contains("daemon"));
    assert!(stdout.contains("doctor"));
}

#[test]
fn test_cli_version() {
    let output = starfeed(&["--version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("starfeed"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_command() {
    let output = starfeed(&["invalid-command"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error") || stderr.contains("unrecognized"));
}

#[test]
fn test_help_subcommands() {
    for subcommand in ["sync", "list", "subscriptions", "daemon", "doctor"] {
        let output = starfeed(&[subcommand, "--help"]);
        assert!(output.status.success(), "{} --help failed", subcommand);
    }

    let output = starfeed(&["sync", "--help"]);
    assert!(String::from_utf8(output.stdout).unwrap().contains("--dry-run"));
}

#[test]
fn test_error_handling_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.child("invalid.yml");
    std::fs::write(config_file.path(), "freshrss: [this is not: valid").unwrap();

    let output = with_config(config_file.path(), &["sync"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Failed to parse config file"));
}

#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let output = with_config(&temp_dir.path().join("absent.yml"), &["sync"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_sync_requires_freshrss_settings() {
    let env = TestEnvironment::new();
    let config = env.create_minimal_config();

    let output = with_config(&config, &["sync"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Missing required configuration"));
    assert!(stderr.contains("freshrss.url"));
}

#[test]
fn test_env_overrides_fill_missing_settings() {
    let env = TestEnvironment::new();
    let config = env.create_minimal_config();

    // Nothing listens on port 1, so the pass fails at authentication instead of validation
    let output = Command::new(env!("CARGO_BIN_EXE_starfeed"))
        .args(["--config", config.to_str().unwrap(), "sync"])
        .env("STARFEED_FRESHRSS_URL", "http://127.0.0.1:1")
        .env("STARFEED_FRESHRSS_USER", "alice")
        .env("STARFEED_FRESHRSS_API_TOKEN", "secret")
        .env("STARFEED_HTTP_TIMEOUT", "2")
        .output()
        .expect("Failed to execute starfeed");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(!stderr.contains("Missing required configuration"));
    assert!(stderr.contains("Could not authenticate with FreshRSS"));
}

#[test]
fn test_daemon_status_when_not_running() {
    let env = TestEnvironment::new();
    let config = env.create_minimal_config();

    let output = with_config(&config, &["daemon", "status"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Not running"));
}

#[test]
fn test_daemon_stop_when_not_running() {
    let env = TestEnvironment::new();
    let config = env.create_minimal_config();

    let output = with_config(&config, &["daemon", "stop"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("No daemon appears to be running"));
}

#[test]
fn test_doctor_reports_incomplete_config() {
    let env = TestEnvironment::new();
    let config = env.create_minimal_config();

    let output = with_config(&config, &["doctor"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Configuration is incomplete"));
    assert!(stdout.contains("FreshRSS not configured"));
    assert!(stdout.contains("Some checks failed"));
}
