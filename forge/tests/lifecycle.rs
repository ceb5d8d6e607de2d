//! End-to-end plan/apply/check scenarios against a sample workshop on disk.
//!
//! Each test drives the public `Workspace` operations and then inspects the
//! target tree, session state and audit trail the way an operator would.

use std::fs;

use forge::backend::{BackendError, BackendKind, EchoBackend, StubBackend};
use forge::core::plan::Operation;
use forge::core::policy::Severity;
use forge::error::ForgeError;
use forge::io::audit::{Outcome, Phase};
use forge::io::lock::ForgeLock;
use forge::io::session::load_session;
use forge::io::tree_scan::scan_tree;
use forge::orchestrator::ApplyRequest;
use forge::test_support::{ScriptedBackend, TestWorkshop, write_modules};

fn apply_request(goal: &str) -> ApplyRequest {
    ApplyRequest {
        goal: goal.to_string(),
        ..ApplyRequest::default()
    }
}

/// Missing deliverable: exactly one error, from `deliverable-existence`.
#[test]
fn check_reports_missing_deliverable() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();

    let report = ws.check().expect("check").report;
    let errors: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].rule_id, "deliverable-existence");
    assert_eq!(errors[0].path.as_deref(), Some("labs/intro/README.md"));
}

#[test]
fn repeated_plans_are_identical() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();

    let first = ws.plan("test", &EchoBackend::new()).expect("first");
    let second = ws.plan("test", &EchoBackend::new()).expect("second");
    assert_eq!(first.plan.steps, second.plan.steps);
    assert_eq!(first.prelude.fingerprint(), second.prelude.fingerprint());
    assert_ne!(first.audit_id, second.audit_id);
}

/// An unsupported backend is a routine outcome: audited, nothing written.
#[test]
fn unsupported_backend_aborts_apply_without_writes() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    let before = scan_tree(&ws.target_dir()).expect("before");

    let err = ws
        .apply(&apply_request("build"), &StubBackend::new(BackendKind::Openai))
        .unwrap_err();
    match &err {
        ForgeError::Backend { source, attempts } => {
            assert!(matches!(source, BackendError::Unsupported(_)));
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(scan_tree(&ws.target_dir()).expect("after"), before);

    let log = ws.audit_log();
    let ids = log.list().expect("list");
    assert_eq!(ids.len(), 1);
    let record = log.load_record(&ids[0]).expect("record");
    assert_eq!(record.operation, Operation::Apply);
    assert_eq!(record.outcome, Outcome::Failed);
    assert_eq!(record.error.expect("error").kind, "unsupported");
    assert!(log.record_dir(&ids[0]).join("prompt.md").is_file());
    assert_eq!(load_session(&ws.paths().session_path).expect("session"), None);
}

/// A changed duration between plan and apply is drift, caught before the backend.
#[test]
fn spec_change_between_plan_and_apply_is_drift() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    let planned = ws.plan("test", &EchoBackend::new()).expect("plan");

    write_modules(workshop.path(), 90).expect("edit spec");
    let before = scan_tree(&ws.target_dir()).expect("before");
    let backend = ScriptedBackend::new(Vec::new());

    let err = ws
        .apply(
            &ApplyRequest {
                goal: "test".to_string(),
                plan: Some(planned.plan.clone()),
                allowed: Vec::new(),
            },
            &backend,
        )
        .unwrap_err();
    match err {
        ForgeError::SpecDrift { recorded, current } => {
            assert_eq!(recorded, planned.plan.spec_fingerprint.to_string());
            assert_ne!(current, recorded);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(backend.calls(), 0);
    assert_eq!(scan_tree(&ws.target_dir()).expect("after"), before);

    let log = ws.audit_log();
    let record = log
        .list()
        .expect("list")
        .iter()
        .map(|id| log.load_record(id).expect("record"))
        .find(|r| r.operation == Operation::Apply)
        .expect("apply record");
    assert_eq!(record.error.expect("error").kind, "spec_drift");
    assert_eq!(
        record.phases,
        vec![Phase::BuildingContext, Phase::Aborted, Phase::Recording]
    );
}

#[test]
fn drift_against_session_blocks_fresh_generation_too() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    ws.plan("test", &EchoBackend::new()).expect("plan");
    write_modules(workshop.path(), 45).expect("edit spec");

    let backend = ScriptedBackend::new(Vec::new());
    let err = ws.apply(&apply_request("test"), &backend).unwrap_err();
    assert!(matches!(err, ForgeError::SpecDrift { .. }));
    assert_eq!(backend.calls(), 0);
    assert!(!workshop.path().join("labs").exists());

    // Re-planning records the new fingerprint and unblocks apply.
    ws.plan("test", &EchoBackend::new()).expect("replan");
    ws.apply(&apply_request("test"), &EchoBackend::new())
        .expect("apply");
    assert!(workshop.path().join("labs/intro/README.md").is_file());
}

#[test]
fn malformed_session_fingerprint_fails_apply_with_audit() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    let session_path = &ws.paths().session_path;
    fs::create_dir_all(session_path.parent().expect("state dir")).expect("create state dir");
    fs::write(session_path, r#"{"spec_fingerprint": "abc"}"#).expect("write session");

    let backend = ScriptedBackend::new(Vec::new());
    let err = ws.apply(&apply_request("test"), &backend).unwrap_err();
    assert!(matches!(err, ForgeError::Io(_)), "unexpected error {err:?}");
    assert!(format!("{err:#}").contains("invalid fingerprint"));
    assert_eq!(backend.calls(), 0);
    assert!(!workshop.path().join("labs").exists());

    let ids = ws.audit_log().list().expect("list");
    assert_eq!(ids.len(), 1);
    let record = ws.audit_log().load_record(&ids[0]).expect("record");
    assert_eq!(record.outcome, Outcome::Failed);
    assert_eq!(record.error.expect("error").kind, "io");
}

#[test]
fn create_over_different_content_fails_staging_without_writes() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    let lab = workshop.path().join("labs/intro/README.md");
    fs::create_dir_all(lab.parent().expect("lab dir")).expect("create lab dir");
    fs::write(&lab, "hand-written lab\n").expect("write lab");
    let before = scan_tree(&ws.target_dir()).expect("before");

    let err = ws
        .apply(&apply_request("intro"), &EchoBackend::new())
        .unwrap_err();
    match &err {
        ForgeError::Staging { path, reason } => {
            assert_eq!(path, "labs/intro/README.md");
            assert!(reason.contains("different content"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(scan_tree(&ws.target_dir()).expect("after"), before);
    let staging_left = fs::read_dir(&ws.paths().staging_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(staging_left, 0);

    let ids = ws.audit_log().list().expect("list");
    assert_eq!(ids.len(), 1);
    let record = ws.audit_log().load_record(&ids[0]).expect("record");
    assert_eq!(record.outcome, Outcome::Failed);
    assert_eq!(record.error.expect("error").kind, "staging");
    assert!(record.committed.is_empty());
    assert_eq!(
        record.phases,
        vec![
            Phase::BuildingContext,
            Phase::AwaitingPlan,
            Phase::Staging,
            Phase::Aborted,
            Phase::Recording,
        ]
    );
    assert!(ws.audit_log().record_dir(&ids[0]).join("plan.json").is_file());
    assert_eq!(load_session(&ws.paths().session_path).expect("session"), None);
}

#[test]
fn malformed_spec_fails_plan_with_audit() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    fs::write(
        workshop.path().join("spec/modules.yml"),
        "modules:\n  - id: intro\n    duration_minutes: .nan\n",
    )
    .expect("write modules");

    let backend = ScriptedBackend::new(Vec::new());
    let err = ws.plan("test", &backend).unwrap_err();
    match &err {
        ForgeError::MalformedSpec { location, .. } => {
            assert!(location.starts_with("modules"), "{location}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(backend.calls(), 0);

    let ids = ws.audit_log().list().expect("list");
    assert_eq!(ids.len(), 1);
    let record = ws.audit_log().load_record(&ids[0]).expect("record");
    assert_eq!(record.outcome, Outcome::Failed);
    assert_eq!(record.error.expect("error").kind, "malformed_spec");
    assert_eq!(record.spec_fingerprint, None);
    assert_eq!(
        record.phases,
        vec![Phase::BuildingContext, Phase::Aborted, Phase::Recording]
    );
    assert_eq!(load_session(&ws.paths().session_path).expect("session"), None);
}

const OVERSIZED_SLIDES_PLAN: &str = r###"```json
{
  "rationale": "intro lab plus slides",
  "steps": [
    {"path": "labs/intro/README.md", "action": "create", "spec_refs": ["modules#intro"], "content": "# Introduction\n"},
    {"path": "instructor/slides/01-intro.md", "action": "create", "spec_refs": ["modules#intro"], "content": "## Intro\n- a\n- b\n- c\n- d\n- e\n- f\n- g\n"}
  ]
}
```"###;

#[test]
fn policy_errors_commit_nothing() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    let before = scan_tree(&ws.target_dir()).expect("before");
    let backend = ScriptedBackend::new(vec![Ok(OVERSIZED_SLIDES_PLAN.to_string())]);

    let err = ws.apply(&apply_request("slides"), &backend).unwrap_err();
    let ForgeError::PolicyViolation { report } = err else {
        panic!("expected policy violation, got {err:?}");
    };
    assert_eq!(report.errors, 1);
    assert_eq!(report.violations[0].rule_id, "slide-content-quality");
    assert_eq!(
        report.violations[0].path.as_deref(),
        Some("instructor/slides/01-intro.md")
    );
    assert_eq!(scan_tree(&ws.target_dir()).expect("after"), before);

    let ids = ws.audit_log().list().expect("list");
    let record = ws.audit_log().load_record(&ids[0]).expect("record");
    assert_eq!(record.outcome, Outcome::Blocked);
    assert!(record.committed.is_empty());
    assert!(record.phases.contains(&Phase::EvaluatingPolicy));
    assert!(!record.phases.contains(&Phase::Committing));
    let dir = ws.audit_log().record_dir(&ids[0]);
    for file in ["plan.json", "plan.md", "report.json", "report.md", "response.txt"] {
        assert!(dir.join(file).is_file(), "{file} missing from audit record");
    }
}

#[test]
fn check_twice_yields_identical_reports() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();

    let first = ws.check().expect("first");
    let first_json = fs::read(ws.paths().compliance_json_path()).expect("first json");
    let first_md = fs::read(ws.paths().compliance_md_path()).expect("first md");
    let second = ws.check().expect("second");

    assert_eq!(first.report.to_json().expect("a"), second.report.to_json().expect("b"));
    assert_eq!(fs::read(ws.paths().compliance_json_path()).expect("json"), first_json);
    assert_eq!(fs::read(ws.paths().compliance_md_path()).expect("md"), first_md);
    assert_ne!(first.audit_id, second.audit_id);
}

#[test]
fn supplied_plan_is_reused_without_backend_calls() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    let planned = ws.plan("intro", &EchoBackend::new()).expect("plan");

    let backend = ScriptedBackend::new(Vec::new());
    let applied = ws
        .apply(
            &ApplyRequest {
                goal: "intro".to_string(),
                plan: Some(planned.plan.clone()),
                allowed: Vec::new(),
            },
            &backend,
        )
        .expect("apply");
    assert_eq!(backend.calls(), 0);
    assert_eq!(applied.committed, vec!["labs/intro/README.md"]);
    assert_eq!(
        fs::read_to_string(workshop.path().join("labs/intro/README.md")).expect("lab"),
        planned.plan.steps[0].content
    );

    let session = load_session(&ws.paths().session_path)
        .expect("load")
        .expect("session");
    assert_eq!(session.last_operation, Some(Operation::Apply));
    assert_eq!(session.last_backend.as_deref(), Some("echo"));

    let report = ws.check().expect("check").report;
    assert_eq!(report.errors, 0);
}

#[test]
fn concurrent_operation_fails_fast() {
    let workshop = TestWorkshop::new().expect("workshop");
    let ws = workshop.workspace();
    let _held = ForgeLock::acquire(&ws.paths().lock_path, Operation::Plan).expect("lock");

    let err = ws
        .apply(&apply_request("build"), &EchoBackend::new())
        .unwrap_err();
    assert!(matches!(err, ForgeError::ConcurrentOperation { .. }));
    assert!(!workshop.path().join("labs").exists());
}

#[test]
fn fingerprint_ignores_key_order() {
    let a = TestWorkshop::new().expect("a");
    let b = TestWorkshop::new().expect("b");
    fs::write(
        b.path().join("spec/workshop.yml"),
        "policy:\n  license: MIT\n  student_ai_usage: restricted\nduration:\n  session_minutes: 90.0\n  sessions_per_group: 2\n  groups: 1\naudience: backend engineers\nversion: '1.0'\ntitle: Rust 101\nid: rust-101\n",
    )
    .expect("reordered workshop");

    let fa = a.workspace().snapshot().expect("snapshot a");
    let fb = b.workspace().snapshot().expect("snapshot b");
    assert_eq!(fa.fingerprint(), fb.fingerprint());
}
