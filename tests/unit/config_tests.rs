use std::path::PathBuf;
use std::time::Duration;

use procdeck::config::{validate_code, GlobalConfig, STORAGE_ROOT_ENV};
use procdeck::AppError;

fn sample_toml(workspace: &str, storage: &str) -> String {
    format!(
        r#"
workspace_root = '{workspace}'
storage_root = '{storage}'
clear_output_on_start = false
forbidden_env_vars = ["RUBYOPT"]
debug_adapter_type = "lldb"
watch_state_dir = true

[shell]
program = "/bin/bash"
args = ["-c"]

[timeouts]
ready_ms = 250
stop_seconds = 2
stop_poll_ms = 20
lock_ms = 500
lock_retry_ms = 10
poll_interval_ms = 100

[[commands]]
code = "SRV"
command = "rails"
args = ["server", "-p", "3000"]

[[commands]]
code = "JOBS"
command = "bin/jobs"
forbidden_env_vars = ["DEBUG"]
"#
    )
}

fn minimal_toml(workspace: &str, storage: &str) -> String {
    format!(
        r#"
workspace_root = '{workspace}'
storage_root = '{storage}'
"#
    )
}

#[test]
fn parses_valid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().to_str().expect("utf8 path");
    let toml = sample_toml(workspace, "/tmp/procdeck-store");

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(
        config.workspace_root,
        temp.path().canonicalize().expect("canonicalize temp path")
    );
    assert_eq!(config.storage_root(), PathBuf::from("/tmp/procdeck-store"));
    assert!(!config.clear_output_on_start);
    assert_eq!(config.forbidden_env_vars, vec!["RUBYOPT".to_owned()]);
    assert_eq!(config.debug_adapter_type, "lldb");
    assert!(config.watch_state_dir);
    assert_eq!(config.shell.program, "/bin/bash");
    assert_eq!(config.shell.args, vec!["-c".to_owned()]);
    assert_eq!(config.timeouts.ready(), Duration::from_millis(250));
    assert_eq!(config.timeouts.stop(), Duration::from_secs(2));
    assert_eq!(config.timeouts.poll_interval(), Duration::from_millis(100));
    assert_eq!(config.codes(), vec!["SRV".to_owned(), "JOBS".to_owned()]);

    let jobs = config.command("JOBS").expect("JOBS configured");
    assert_eq!(jobs.command, "bin/jobs");
    assert!(jobs.args.is_empty());
    assert_eq!(jobs.forbidden_env_vars, vec!["DEBUG".to_owned()]);
}

#[test]
fn applies_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = minimal_toml(temp.path().to_str().expect("utf8 path"), "/tmp/store");

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert!(config.clear_output_on_start);
    assert!(config.forbidden_env_vars.is_empty());
    assert_eq!(config.debug_adapter_type, "rdbg");
    assert!(!config.watch_state_dir);
    assert_eq!(config.shell.args, vec!["-l".to_owned(), "-c".to_owned()]);
    assert_eq!(config.timeouts.ready(), Duration::from_secs(5));
    assert_eq!(config.timeouts.stop(), Duration::from_secs(30));
    assert_eq!(config.timeouts.stop_poll(), Duration::from_millis(50));
    assert_eq!(config.timeouts.lock(), Duration::from_secs(10));
    assert_eq!(config.timeouts.lock_retry(), Duration::from_millis(100));
    assert_eq!(config.timeouts.poll_interval(), Duration::from_secs(2));
    assert!(config.commands.is_empty());
}

#[test]
fn unknown_code_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = minimal_toml(temp.path().to_str().expect("utf8 path"), "/tmp/store");
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    let err = config.command("NOPE").expect_err("no such command");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn rejects_duplicate_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
workspace_root = '{}'
storage_root = "/tmp/store"

[[commands]]
code = "SRV"
command = "a"

[[commands]]
code = "SRV"
command = "b"
"#,
        temp.path().display()
    );

    let err = GlobalConfig::from_toml_str(&toml).expect_err("duplicate codes");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("duplicate")));
}

#[test]
fn rejects_blank_command() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
workspace_root = '{}'
storage_root = "/tmp/store"

[[commands]]
code = "SRV"
command = "   "
"#,
        temp.path().display()
    );

    assert!(matches!(
        GlobalConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_zero_poll_interval() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
workspace_root = '{}'
storage_root = "/tmp/store"

[timeouts]
poll_interval_ms = 0
"#,
        temp.path().display()
    );

    let err = GlobalConfig::from_toml_str(&toml).expect_err("zero interval");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("poll_interval_ms")));
}

#[test]
fn rejects_missing_workspace_root() {
    let toml = minimal_toml("/definitely/not/a/real/workspace", "/tmp/store");
    assert!(matches!(
        GlobalConfig::from_toml_str(&toml),
        Err(AppError::Config(msg)) if msg.contains("workspace_root")
    ));
}

#[test]
fn rejects_invalid_toml() {
    let err = GlobalConfig::from_toml_str("workspace_root = [").expect_err("bad toml");
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("invalid config")));
}

#[test]
fn loads_from_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("procdeck.toml");
    std::fs::write(
        &path,
        minimal_toml(temp.path().to_str().expect("utf8 path"), "/tmp/store"),
    )
    .expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.storage_root(), PathBuf::from("/tmp/store"));

    let missing = GlobalConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(missing, Err(AppError::Config(_))));
}

#[test]
#[serial_test::serial]
fn storage_root_falls_back_to_env() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = temp.path().join("shared");
    let toml = format!("workspace_root = '{}'\n", temp.path().display());

    let previous = std::env::var_os(STORAGE_ROOT_ENV);
    std::env::set_var(STORAGE_ROOT_ENV, &store);
    let result = GlobalConfig::from_toml_str(&toml);
    match previous {
        Some(value) => std::env::set_var(STORAGE_ROOT_ENV, value),
        None => std::env::remove_var(STORAGE_ROOT_ENV),
    }

    let config = result.expect("config parses");
    assert_eq!(config.storage_root(), store);
}

#[test]
fn code_validation() {
    for good in ["SRV", "web-1", "jobs.worker", "a b"] {
        assert!(validate_code(good).is_ok(), "{good} should be accepted");
    }
    for bad in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
        assert!(validate_code(bad).is_err(), "{bad:?} should be rejected");
    }
}
