//! Deterministic backend for tests and dry runs.
//!
//! Emits one `create` step per declared deliverable, with content built from
//! the prelude digest alone. The goal text never reaches the output, so two
//! calls against the same specification return identical plans.

use std::collections::BTreeSet;

use serde_json::json;
use tracing::debug;

use super::{BackendError, CompletionRequest, GenerationBackend, RawResponse};
use crate::core::prelude::ModuleDigest;

#[derive(Debug, Clone, Default)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl GenerationBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn performs_external_calls(&self) -> bool {
        false
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<RawResponse, BackendError> {
        let digest = request.prelude.digest();
        let mut seen = BTreeSet::new();
        let mut steps = Vec::new();
        for module in &digest.modules {
            for deliverable in &module.deliverables {
                if deliverable.ends_with('/') || !seen.insert(deliverable.as_str()) {
                    continue;
                }
                steps.push(json!({
                    "path": deliverable,
                    "action": "create",
                    "rationale": format!("Declared deliverable of module '{}'.", module.id),
                    "spec_refs": [format!("modules#{}", module.id)],
                    "content": deliverable_body(&digest.workshop_title, module, deliverable),
                }));
            }
        }
        debug!(steps = steps.len(), "echo backend produced plan");

        let body = json!({
            "rationale": format!(
                "Create every declared deliverable of '{}'.",
                digest.workshop_title
            ),
            "risks": [],
            "steps": steps,
        });
        let pretty = serde_json::to_string_pretty(&body)
            .map_err(|err| BackendError::Transport(format!("encode plan: {err}")))?;
        Ok(RawResponse::new(format!("```json\n{pretty}\n```\n")))
    }
}

fn deliverable_body(workshop_title: &str, module: &ModuleDigest, path: &str) -> String {
    if path.ends_with(".md") {
        let mut body = format!("# {}\n\n", module.title);
        if !module.objective.is_empty() {
            body.push_str(&format!("**Objective:** {}\n\n", module.objective));
        }
        if let Some(minutes) = module.duration_minutes {
            body.push_str(&format!("**Duration:** {minutes} min\n\n"));
        }
        if !module.depends_on.is_empty() {
            body.push_str(&format!(
                "**Prerequisites:** {}\n\n",
                module.depends_on.join(", ")
            ));
        }
        body.push_str(&format!(
            "Part of {workshop_title}. Spec reference: `modules#{}`.\n",
            module.id
        ));
        body
    } else {
        format!(
            "{workshop_title}: module {} ({}).\n",
            module.id, module.title
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::canonical::{SpecTree, build};
    use crate::core::plan::{Goal, Operation, parse_plan};
    use crate::core::prelude::render;

    fn prelude() -> crate::core::prelude::Prelude {
        let mut tree = SpecTree::new();
        tree.insert(
            "workshop".to_string(),
            serde_yaml::from_str("id: demo\ntitle: Demo").expect("yaml"),
        );
        tree.insert(
            "modules".to_string(),
            serde_yaml::from_str(
                "modules:\n  - id: intro\n    objective: X\n    duration_minutes: 60\n    deliverables: [labs/intro/README.md, labs/intro/main.rs]\n  - id: more\n    deliverables: [labs/intro/README.md]\n",
            )
            .expect("yaml"),
        );
        render(&build(&tree).expect("snapshot")).expect("prelude")
    }

    #[test]
    fn one_create_step_per_unique_deliverable() {
        let prelude = prelude();
        let goal = Goal::new("anything", Operation::Plan);
        let request = CompletionRequest {
            prelude: &prelude,
            goal: &goal,
            prompt: "ignored",
            timeout: Duration::from_secs(1),
        };
        let raw = EchoBackend::new().complete(&request).expect("complete");
        let plan = parse_plan(&raw.text, "anything", prelude.spec_fingerprint(), "echo")
            .expect("parse");
        let paths: Vec<&str> = plan.steps.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["labs/intro/README.md", "labs/intro/main.rs"]);
        assert!(plan.steps[0].content.starts_with("# intro\n"));
        assert!(!plan.steps[0].content.contains("TODO"));
    }

    #[test]
    fn output_ignores_the_goal() {
        let prelude = prelude();
        let a = Goal::new("first", Operation::Plan);
        let b = Goal::new("second", Operation::Apply);
        let backend = EchoBackend::new();
        let run = |goal: &Goal| {
            backend
                .complete(&CompletionRequest {
                    prelude: &prelude,
                    goal,
                    prompt: "p",
                    timeout: Duration::from_secs(1),
                })
                .expect("complete")
        };
        assert_eq!(run(&a), run(&b));
    }
}
