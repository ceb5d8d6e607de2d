//! CLI tests: spawn the `forge` binary and check exit codes and output.

use std::path::Path;
use std::process::{Command, Output};

use forge::exit_codes;
use forge::io::init::{InitOptions, init_forge};
use forge::test_support::{TestWorkshop, write_modules};

fn forge(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_forge"))
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .expect("run forge")
}

#[test]
fn check_exit_code_tracks_error_violations() {
    let workshop = TestWorkshop::new().expect("workshop");
    init_forge(workshop.path(), &InitOptions { force: false }).expect("init");

    let out = forge(workshop.path(), &["check"]);
    assert_eq!(out.status.code(), Some(exit_codes::BLOCKED));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("deliverable-existence"));

    let out = forge(workshop.path(), &["apply", "build the intro lab"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&out.stdout).contains("committed: labs/intro/README.md"));

    let out = forge(workshop.path(), &["check", "--json"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json report");
    assert_eq!(report["errors"], 0);
}

#[test]
fn check_target_dir_overrides_configured_target() {
    let workshop = TestWorkshop::new().expect("workshop");
    let site = workshop.path().join("site");
    std::fs::create_dir_all(site.join("labs/intro")).expect("labs");
    std::fs::write(site.join("labs/intro/README.md"), "# Intro\n").expect("lab");
    for dir in ["instructor", "reference"] {
        std::fs::create_dir_all(site.join(dir)).expect("dir");
    }

    let out = forge(workshop.path(), &["check", "--target-dir", "site", "--json"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json report");
    assert_eq!(report["errors"], 0);

    let out = forge(workshop.path(), &["check"]);
    assert_eq!(out.status.code(), Some(exit_codes::BLOCKED));
}

#[test]
fn plan_out_then_apply_after_spec_edit_reports_drift() {
    let workshop = TestWorkshop::new().expect("workshop");
    let plan_path = workshop.path().join("plan.json");

    let out = forge(
        workshop.path(),
        &["plan", "test", "--out", plan_path.to_str().expect("utf-8 path")],
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("# Plan: test"));
    assert!(plan_path.is_file());

    write_modules(workshop.path(), 75).expect("edit spec");
    let out = forge(
        workshop.path(),
        &["apply", "test", "--plan", plan_path.to_str().expect("utf-8 path")],
    );
    assert_eq!(out.status.code(), Some(exit_codes::DRIFT));
    assert!(String::from_utf8_lossy(&out.stderr).contains("specification drift"));
    assert!(!workshop.path().join("labs").exists());
}

#[test]
fn plan_file_with_malformed_fingerprint_is_rejected() {
    let workshop = TestWorkshop::new().expect("workshop");
    let plan_path = workshop.path().join("plan.json");
    let out = forge(
        workshop.path(),
        &["plan", "g", "--out", plan_path.to_str().expect("utf-8 path")],
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK));

    let mut plan: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&plan_path).expect("read plan")).expect("plan json");
    plan["spec_fingerprint"] = serde_json::Value::from("abc");
    std::fs::write(&plan_path, plan.to_string()).expect("write plan");

    let out = forge(
        workshop.path(),
        &["apply", "g", "--plan", plan_path.to_str().expect("utf-8 path")],
    );
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid fingerprint"));
    assert!(!workshop.path().join("labs").exists());
}

#[test]
fn stub_backend_exits_with_backend_code() {
    let workshop = TestWorkshop::new().expect("workshop");
    let out = forge(workshop.path(), &["apply", "build", "--backend", "anthropic"]);
    assert_eq!(out.status.code(), Some(exit_codes::BACKEND));
    assert!(!workshop.path().join("labs").exists());
}

#[test]
fn prelude_and_explain() {
    let workshop = TestWorkshop::new().expect("workshop");

    let out = forge(workshop.path(), &["prelude"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("spec_fingerprint="));
    assert!(stdout.contains("### 1. Introduction (`intro`)"));

    let out = forge(workshop.path(), &["explain", "labs/intro/README.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));

    let out = forge(workshop.path(), &["apply", "intro"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let out = forge(workshop.path(), &["explain", "labs/intro/README.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&out.stdout).contains("modules#intro"));
}

#[test]
fn init_refuses_to_run_twice_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(forge(temp.path(), &["init"]).status.code(), Some(exit_codes::OK));
    assert_eq!(forge(temp.path(), &["init"]).status.code(), Some(exit_codes::INVALID));
    assert_eq!(
        forge(temp.path(), &["init", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}
