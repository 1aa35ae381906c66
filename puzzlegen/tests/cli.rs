//! CLI tests for commands that need neither a model server nor SWI-Prolog.
//!
//! Spawns the puzzlegen binary and verifies exit codes and output.

use std::fs;
use std::process::Command;

use puzzlegen::exit_codes;
use puzzlegen::io::config::{GeneratorConfig, load_config};

fn puzzlegen() -> Command {
    Command::new(env!("CARGO_BIN_EXE_puzzlegen"))
}

#[test]
fn scan_reports_denied_predicates() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("game.pl");
    fs::write(&file, "main :- shell('ls'), exists_file(x).\n").expect("write");

    let output = puzzlegen()
        .arg("scan")
        .arg(&file)
        .output()
        .expect("puzzlegen scan");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Critical"), "{stdout}");
    assert!(stdout.contains("'shell'"), "{stdout}");
    assert!(stdout.contains("exists_file"), "{stdout}");
}

#[test]
fn scan_clean_file_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("game.pl");
    fs::write(&file, "room(hall).\nmain :- room(R), write(R).\n").expect("write");

    let output = puzzlegen()
        .arg("scan")
        .arg(&file)
        .output()
        .expect("puzzlegen scan");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("no findings"));
}

#[test]
fn scan_sanitize_prints_neutralized_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("game.pl");
    fs::write(&file, "main :-\n    halt(0).\n").expect("write");

    let output = puzzlegen()
        .args(["scan", "--sanitize"])
        .arg(&file)
        .output()
        .expect("puzzlegen scan --sanitize");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "main :-\n% UNSAFE, commented out:     halt(0).\n"
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("halt"));
}

#[test]
fn init_config_writes_defaults_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("puzzlegen.toml");

    let status = puzzlegen()
        .args(["init-config", "--config"])
        .arg(&path)
        .status()
        .expect("puzzlegen init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load"), GeneratorConfig::default());

    let again = puzzlegen()
        .args(["init-config", "--config"])
        .arg(&path)
        .output()
        .expect("puzzlegen init-config");
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&again.stderr).contains("--force"));
}

#[test]
fn generate_rejects_invalid_request_before_contacting_backends() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = puzzlegen()
        .current_dir(temp.path())
        .args(["generate", "--execute", "--goal", "shell('rm -rf /')"])
        .output()
        .expect("puzzlegen generate");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid request"), "{stderr}");
    assert!(stderr.contains("shell"), "{stderr}");
}

#[test]
fn run_missing_file_is_an_execution_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = puzzlegen()
        .current_dir(temp.path())
        .args(["run", "missing.pl", "--goal", "main"])
        .output()
        .expect("puzzlegen run");

    assert_eq!(output.status.code(), Some(exit_codes::EXECUTION_FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn invalid_config_is_reported() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("puzzlegen.toml");
    fs::write(&path, "max_fix_retries = \"many\"\n").expect("write");

    let output = puzzlegen()
        .args(["query", "true", "--config"])
        .arg(&path)
        .output()
        .expect("puzzlegen query");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("parse"));
}
