use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn kbh_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kbh"))
}

/// Run `kbh` in `dir` with AWS credentials removed from the environment.
fn run_kbh(dir: &Path, args: &[&str]) -> Output {
    Command::new(kbh_binary())
        .args(args)
        .current_dir(dir)
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("AWS_SESSION_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run kbh")
}

#[test]
fn test_init_writes_default_config_once() {
    let tmp = TempDir::new().unwrap();

    let output = run_kbh(tmp.path(), &["init"]);
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let written = fs::read_to_string(tmp.path().join("config/kbh.toml")).unwrap();
    assert!(written.contains("[knowledge_base]"));
    assert!(written.contains("on_create_failure = \"abort\""));

    let again = run_kbh(tmp.path(), &["init"]);
    assert!(!again.status.success());
    let stderr = String::from_utf8_lossy(&again.stderr);
    assert!(stderr.contains("already exists"), "{}", stderr);
}

#[test]
fn test_init_honours_config_flag() {
    let tmp = TempDir::new().unwrap();
    let output = run_kbh(tmp.path(), &["init", "--config", "custom/kb.toml"]);
    assert!(output.status.success());
    assert!(tmp.path().join("custom/kb.toml").exists());
}

#[test]
fn test_completions_need_no_config_or_credentials() {
    let tmp = TempDir::new().unwrap();
    let output = run_kbh(tmp.path(), &["completions", "bash"]);
    assert!(output.status.success());
    let script = String::from_utf8_lossy(&output.stdout);
    assert!(script.contains("kbh"));
    assert!(script.contains("provision"));
}

#[test]
fn test_missing_credentials_fail_before_any_request() {
    let tmp = TempDir::new().unwrap();
    let output = run_kbh(tmp.path(), &["status"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("AWS_ACCESS_KEY_ID"), "{}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[vector_store]\ncollection_name = \"Bad_Name\"\n").unwrap();

    let output = run_kbh(tmp.path(), &["status", "--config", config.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("collection name 'Bad_Name' is invalid"), "{}", stderr);
}

#[test]
fn test_explicit_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let output = run_kbh(tmp.path(), &["deprovision", "--config", "nope.toml"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
