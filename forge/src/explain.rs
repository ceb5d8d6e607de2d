//! Trace a generated file back to the plan step that wrote it.
//!
//! Answers come from audit records only. The spec is never re-read, so the
//! explanation reflects what was true when the file was committed.

use serde::Serialize;
use tracing::debug;

use crate::core::plan::{Operation, StepAction};
use crate::core::tree::normalize_path;
use crate::error::ForgeResult;
use crate::io::audit::{AuditLog, Outcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub path: String,
    pub audit_id: String,
    pub goal: String,
    pub backend: String,
    pub action: StepAction,
    pub spec_refs: Vec<String>,
    pub rationale: String,
    pub committed_at: String,
    /// What the path is for, judged from the workshop layout.
    pub role: Option<&'static str>,
}

/// Newest committed apply whose plan wrote `path`, or `None`.
pub fn explain(
    log: &AuditLog,
    path: &str,
    student_dirs: &[String],
) -> ForgeResult<Option<Explanation>> {
    let normalized = normalize_path(path);
    let wanted = normalized.as_str();
    for id in log.list()? {
        let record = log.load_record(&id)?;
        if record.operation != Operation::Apply || record.outcome != Outcome::Committed {
            continue;
        }
        if !record.committed.iter().any(|p| p == wanted)
            && !record.unchanged.iter().any(|p| p == wanted)
        {
            continue;
        }
        let Some(plan) = log.load_plan(&id)? else {
            continue;
        };
        let Some(step) = plan.step_for(wanted) else {
            continue;
        };
        debug!(path = wanted, audit = %id, "explanation found");
        return Ok(Some(Explanation {
            path: wanted.to_string(),
            audit_id: id,
            goal: record.goal,
            backend: plan.backend.clone(),
            action: step.action,
            spec_refs: step.spec_refs.clone(),
            rationale: step.rationale.clone(),
            committed_at: record.finished_at,
            role: role_of(wanted, student_dirs),
        }));
    }
    Ok(None)
}

fn role_of(path: &str, student_dirs: &[String]) -> Option<&'static str> {
    let top = path.split('/').next()?;
    if student_dirs.iter().any(|dir| normalize_path(dir) == top) {
        return Some("student lab material");
    }
    match top {
        "instructor" => Some("instructor-only material"),
        "reference" => Some("reference solution"),
        _ => None,
    }
}

impl Explanation {
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.path);
        if let Some(role) = self.role {
            out.push_str(&format!("  role:      {role}\n"));
        }
        out.push_str(&format!("  action:    {}\n", self.action));
        if self.spec_refs.is_empty() {
            out.push_str("  spec refs: (none recorded)\n");
        } else {
            out.push_str(&format!("  spec refs: {}\n", self.spec_refs.join(", ")));
        }
        if !self.rationale.is_empty() {
            out.push_str(&format!("  rationale: {}\n", self.rationale));
        }
        out.push_str(&format!(
            "  goal:      {}\n  backend:   {}\n  audit:     {}\n  committed: {}\n",
            self.goal, self.backend, self.audit_id, self.committed_at
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoBackend;
    use crate::io::config::ForgeConfig;
    use crate::orchestrator::{ApplyRequest, Workspace};
    use crate::test_support::write_sample_workshop;

    #[test]
    fn explains_committed_files_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_sample_workshop(temp.path()).expect("workshop");
        let ws = Workspace::with_config(temp.path(), ForgeConfig::default());
        let dirs = ws.config().policy.student_dirs.clone();

        ws.plan("draft", &EchoBackend::new()).expect("plan");
        assert_eq!(
            explain(&ws.audit_log(), "labs/intro/README.md", &dirs).expect("explain"),
            None
        );

        let applied = ws
            .apply(
                &ApplyRequest {
                    goal: "build intro".to_string(),
                    ..ApplyRequest::default()
                },
                &EchoBackend::new(),
            )
            .expect("apply");

        let found = explain(&ws.audit_log(), "./labs/intro/README.md", &dirs)
            .expect("explain")
            .expect("explanation");
        assert_eq!(found.audit_id, applied.audit_id);
        assert_eq!(found.spec_refs, vec!["modules#intro"]);
        assert_eq!(found.role, Some("student lab material"));
        assert_eq!(found.goal, "build intro");
        assert!(found.render().contains("spec refs: modules#intro"));

        assert_eq!(
            explain(&ws.audit_log(), "README.md", &dirs).expect("explain"),
            None
        );
    }

    #[test]
    fn roles_follow_layout() {
        let dirs = vec!["labs".to_string()];
        assert_eq!(
            role_of("instructor/notes.md", &dirs),
            Some("instructor-only material")
        );
        assert_eq!(
            role_of("reference/intro/main.rs", &dirs),
            Some("reference solution")
        );
        assert_eq!(role_of("README.md", &dirs), None);

        let spelled = vec!["./labs/".to_string()];
        assert_eq!(
            role_of("labs/intro/README.md", &spelled),
            Some("student lab material")
        );
    }
}
