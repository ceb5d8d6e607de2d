//! Plan model and parsing of backend responses into plans.

use std::collections::BTreeSet;
use std::fmt;

use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::canonical::Fingerprint;
use crate::error::{ForgeError, ForgeResult};

pub const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan.schema.json"
));

/// Directory the orchestrator owns inside a workshop; plans may not touch it.
pub const RESERVED_DIR: &str = ".forge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Plan,
    Apply,
    Check,
    Explain,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Plan => "plan",
            Operation::Apply => "apply",
            Operation::Check => "check",
            Operation::Explain => "explain",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator intent plus the operation it drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub text: String,
    pub operation: Operation,
}

impl Goal {
    pub fn new(text: impl Into<String>, operation: Operation) -> Self {
        Self {
            text: text.into(),
            operation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Create,
    Update,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Create => f.write_str("create"),
            StepAction::Update => f.write_str("update"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Target-relative, `/`-separated file path.
    pub path: String,
    pub action: StepAction,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub spec_refs: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    /// Full file body to stage.
    pub content: String,
}

/// Ordered proposed changes, tagged with the snapshot fingerprint they were built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub spec_fingerprint: Fingerprint,
    pub backend: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub risks: Vec<String>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn step_for(&self, path: &str) -> Option<&Step> {
        let wanted = path.trim_start_matches("./");
        self.steps.iter().find(|s| s.path == wanted)
    }
}

#[derive(Deserialize)]
struct PlanBody {
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    risks: Vec<String>,
    steps: Vec<Step>,
}

/// Parse a raw backend response into a [`Plan`].
///
/// The plan JSON is taken from the first fenced ```json block, or the whole
/// response when there is no fence. Errors carry the raw response.
pub fn parse_plan(
    raw: &str,
    goal: &str,
    spec_fingerprint: &Fingerprint,
    backend: &str,
) -> ForgeResult<Plan> {
    let fail = |reason: String| ForgeError::PlanParse {
        reason,
        raw_response: raw.to_string(),
    };

    let body = extract_json(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|err| fail(format!("invalid JSON: {err}")))?;
    validate_schema(&value).map_err(fail)?;
    let parsed: PlanBody =
        serde_json::from_value(value).map_err(|err| fail(format!("invalid plan: {err}")))?;

    let mut seen = BTreeSet::new();
    for step in &parsed.steps {
        check_step_path(&step.path)
            .map_err(|reason| fail(format!("step '{}': {reason}", step.path)))?;
        if !seen.insert(step.path.as_str()) {
            return Err(fail(format!("duplicate step path '{}'", step.path)));
        }
    }

    Ok(Plan {
        goal: goal.to_string(),
        spec_fingerprint: spec_fingerprint.clone(),
        backend: backend.to_string(),
        rationale: parsed.rationale,
        risks: parsed.risks,
        steps: parsed.steps,
    })
}

fn extract_json(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let after = &raw[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    raw.trim()
}

fn validate_schema(value: &Value) -> Result<(), String> {
    let schema: Value =
        serde_json::from_str(PLAN_SCHEMA).map_err(|err| format!("plan schema: {err}"))?;
    let validator = validator_for(&schema).map_err(|err| format!("plan schema: {err}"))?;
    if validator.is_valid(value) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(format!("schema validation failed: {}", messages.join("; ")))
}

/// Plan paths must stay inside the target tree and outside the reserved dir.
pub fn check_step_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("path is empty".to_string());
    }
    if path.starts_with('/') || path.contains(':') {
        return Err("path must be relative".to_string());
    }
    if path.contains('\\') {
        return Err("path must use '/' separators".to_string());
    }
    for component in path.split('/') {
        match component {
            "" | "." => return Err("path has empty or '.' components".to_string()),
            ".." => return Err("path escapes the target directory".to_string()),
            _ => {}
        }
    }
    if path == RESERVED_DIR || path.starts_with(&format!("{RESERVED_DIR}/")) {
        return Err(format!("path is inside {RESERVED_DIR}/"));
    }
    Ok(())
}

/// Human-readable plan, stored next to `plan.json` in audit records.
pub fn render_plan_markdown(plan: &Plan) -> String {
    let mut out = format!("# Plan: {}\n\n", plan.goal);
    out.push_str(&format!(
        "- Backend: `{}`\n- Spec fingerprint: `{}`\n- Steps: {}\n",
        plan.backend,
        plan.spec_fingerprint.short(),
        plan.steps.len()
    ));
    if !plan.rationale.is_empty() {
        out.push_str(&format!("\n{}\n", plan.rationale));
    }
    if !plan.risks.is_empty() {
        out.push_str("\n## Risks\n\n");
        for risk in &plan.risks {
            out.push_str(&format!("- {risk}\n"));
        }
    }
    for (i, step) in plan.steps.iter().enumerate() {
        out.push_str(&format!("\n## {}. {} `{}`\n", i + 1, step.action, step.path));
        if !step.rationale.is_empty() {
            out.push_str(&format!("\n{}\n", step.rationale));
        }
        if !step.spec_refs.is_empty() {
            out.push_str(&format!("\nSpec refs: {}\n", step.spec_refs.join(", ")));
        }
        if !step.risks.is_empty() {
            out.push_str(&format!("\nRisks: {}\n", step.risks.join(", ")));
        }
    }
    out
}
