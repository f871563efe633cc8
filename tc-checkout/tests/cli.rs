//! CLI tests for the `tc-checkout` binary.
//!
//! Spawns the binary and verifies exit codes for help, usage errors, invalid
//! requests, config errors and backend failures. None of these need `hg`.

use std::fs;
use std::process::{Command, Output};

use tc_checkout::exit_codes;
use tc_checkout::test_support::Workspace;

fn tc_checkout(ws: &Workspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tc-checkout"))
        .current_dir(ws.path())
        .env("HOME", ws.path())
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run tc-checkout")
}

/// Config that points at a binary that does not exist and disables the cache.
fn offline_config(ws: &Workspace) -> String {
    let path = ws.path().join("config.toml");
    fs::write(
        &path,
        "hg_binary = \"tc-checkout-no-such-hg\"\n\n[retry]\nmax_attempts = 1\n\n[cache]\nenabled = false\n",
    )
    .expect("write config");
    path.to_string_lossy().to_string()
}

#[test]
fn help_exits_ok() {
    let ws = Workspace::new().expect("workspace");
    let output = tc_checkout(&ws, &["--help"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("BASE_URL"), "usage should list positionals: {stdout}");
}

#[test]
fn missing_arguments_are_a_usage_error() {
    let ws = Workspace::new().expect("workspace");
    let output = tc_checkout(&ws, &["work"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn blank_base_url_is_an_invalid_request() {
    let ws = Workspace::new().expect("workspace");
    let config = offline_config(&ws);
    let output = tc_checkout(&ws, &["--config", &config, "work", "  "]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid request"));
    assert!(!ws.checkout("work").exists());
}

#[test]
fn missing_config_file_fails() {
    let ws = Workspace::new().expect("workspace");
    let output = tc_checkout(
        &ws,
        &[
            "--config",
            "does-not-exist.toml",
            "work",
            "https://hg.example/repoA",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
}

#[test]
fn backend_failure_names_the_phase() {
    let ws = Workspace::new().expect("workspace");
    let config = offline_config(&ws);
    let output = tc_checkout(
        &ws,
        &["--config", &config, "work", "https://hg.example/repoA"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("checkout failed during clone"),
        "unexpected stderr: {stderr}"
    );
    assert!(output.stdout.is_empty());
}
