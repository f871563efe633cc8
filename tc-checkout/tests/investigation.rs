//! Investigation tests against a real `hg` binary.
//!
//! These tests verify how the mercurial backend behaves with the actual tool
//! and are excluded from regular CI runs because they require `hg` on PATH.
//!
//! Run with: `cargo test --test investigation -- --ignored`

use std::fs;
use std::path::Path;
use std::process::Command;

use tc_checkout::core::retry::RetryPolicy;
use tc_checkout::core::types::{Action, CheckoutRequest};
use tc_checkout::engine::Reconciler;
use tc_checkout::io::backend::Backend;
use tc_checkout::io::hg::HgBackend;
use tc_checkout::test_support::Workspace;

fn hg(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("hg")
        .current_dir(dir)
        .env("HGPLAIN", "1")
        .env("HGUSER", "tc-checkout <tc-checkout@example.com>")
        .args(args)
        .output()
        .expect("spawn hg");
    assert!(
        output.status.success(),
        "hg {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit(repo: &Path, file: &str, contents: &str) -> String {
    fs::write(repo.join(file), contents).expect("write");
    hg(repo, &["commit", "-A", "-m", file]);
    hg(repo, &["log", "-r", ".", "--template", "{node}"])
}

#[test]
#[ignore = "requires hg on PATH"]
fn real_hg_clone_update_and_purge() {
    let ws = Workspace::new().expect("workspace");
    let upstream = ws.checkout("upstream");
    fs::create_dir_all(&upstream).expect("mkdir");
    hg(&upstream, &["init"]);
    let first = commit(&upstream, "a.txt", "one");
    let second = commit(&upstream, "b.txt", "two");

    let dir = ws.checkout("work");
    let url = upstream.to_string_lossy().to_string();
    let backend = HgBackend::default();
    let reconciler = Reconciler::new(backend.clone(), RetryPolicy::immediate(2));
    let request = |rev: Option<&str>| CheckoutRequest {
        directory: dir.clone(),
        base_url: Some(url.clone()),
        head_rev: rev.map(str::to_string),
        ..CheckoutRequest::default()
    };

    let cloned = reconciler.reconcile(&request(None)).expect("clone");
    assert_eq!(cloned.action, Action::Cloned);
    assert_eq!(cloned.final_revision, second);

    let again = reconciler.reconcile(&request(None)).expect("noop");
    assert_eq!(again.action, Action::NoOp);

    let pinned = reconciler
        .reconcile(&request(Some(&first[..12])))
        .expect("update to first");
    assert_eq!(pinned.action, Action::PulledAndUpdated);
    assert_eq!(pinned.final_revision, first);

    fs::write(dir.join("a.txt"), "local edit").expect("edit");
    fs::write(dir.join("untracked.log"), "junk").expect("junk");
    assert!(!backend.is_clean(&dir).expect("status"));

    let purged = reconciler
        .reconcile(&request(Some(&first[..12])))
        .expect("purge");
    assert_eq!(purged.action, Action::Recreated);
    assert!(!dir.join("untracked.log").exists());
    assert_eq!(fs::read_to_string(dir.join("a.txt")).expect("read"), "one");
}

#[test]
#[ignore = "requires hg on PATH"]
fn real_hg_reports_unknown_revision_as_fatal() {
    let ws = Workspace::new().expect("workspace");
    let upstream = ws.checkout("upstream");
    fs::create_dir_all(&upstream).expect("mkdir");
    hg(&upstream, &["init"]);
    commit(&upstream, "a.txt", "one");

    let reconciler = Reconciler::new(HgBackend::default(), RetryPolicy::immediate(2));
    let err = reconciler
        .reconcile(&CheckoutRequest {
            directory: ws.checkout("work"),
            base_url: Some(upstream.to_string_lossy().to_string()),
            head_rev: Some("deadbeefdeadbeef".to_string()),
            ..CheckoutRequest::default()
        })
        .expect_err("unknown revision");
    assert!(err.phase().is_some(), "unexpected error: {err}");
}
