//! Stable, spec-derived context digest handed to generation backends.
//!
//! The prelude is a pure function of the snapshot: the same specification
//! always yields the same text and fingerprint, on any machine. It is also what
//! `forge prelude` prints so operators can see the backend's context up front.

use minijinja::Environment;
use serde::{Deserialize, Serialize};

use crate::core::canonical::{Fingerprint, SpecificationSnapshot};
use crate::core::plan::{Goal, PLAN_SCHEMA};
use crate::core::workshop::{ModuleSpec, WorkshopView};
use crate::error::ForgeResult;

const PRELUDE_TEMPLATE: &str = include_str!("../prompts/prelude.md");
const REQUEST_TEMPLATE: &str = include_str!("../prompts/request.md");

/// Structured module summary carried alongside the prelude text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDigest {
    pub id: String,
    pub title: String,
    pub objective: String,
    pub duration_minutes: Option<i64>,
    pub deliverables: Vec<String>,
    pub depends_on: Vec<String>,
}

impl ModuleDigest {
    fn from_module(module: &ModuleSpec) -> Self {
        let id = module.id_or_unknown().to_string();
        Self {
            title: module.title.clone().unwrap_or_else(|| id.clone()),
            objective: module.objective.clone().unwrap_or_default(),
            duration_minutes: module.duration_minutes,
            deliverables: module.deliverables.clone(),
            depends_on: module.depends_on.clone(),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreludeDigest {
    pub workshop_id: String,
    pub workshop_title: String,
    pub modules: Vec<ModuleDigest>,
}

/// Immutable rendered prelude. Regenerate from a snapshot instead of editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prelude {
    text: String,
    fingerprint: Fingerprint,
    spec_fingerprint: Fingerprint,
    digest: PreludeDigest,
}

impl Prelude {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hash over the spec fingerprint and the rendered text.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn spec_fingerprint(&self) -> &Fingerprint {
        &self.spec_fingerprint
    }

    pub fn digest(&self) -> &PreludeDigest {
        &self.digest
    }
}

#[derive(Serialize)]
struct WorkshopContext {
    id: String,
    title: String,
    version: String,
    audience: String,
    duration: String,
    student_ai_usage: String,
    license: String,
    slides: bool,
    handouts: bool,
}

#[derive(Serialize)]
struct ModuleContext {
    id: String,
    title: String,
    objective: String,
    duration: String,
    deliverables: Vec<String>,
    depends_on: Vec<String>,
}

/// Render the prelude for `snapshot`.
pub fn render(snapshot: &SpecificationSnapshot) -> ForgeResult<Prelude> {
    let view = WorkshopView::from_snapshot(snapshot)?;
    let spec_fingerprint = snapshot.fingerprint().clone();

    let workshop = workshop_context(&view);
    let modules: Vec<ModuleContext> = view.modules.iter().map(module_context).collect();

    let mut env = Environment::new();
    env.add_template("prelude", PRELUDE_TEMPLATE)
        .map_err(anyhow::Error::from)?;
    let text = env
        .get_template("prelude")
        .and_then(|template| {
            template.render(minijinja::context! {
                workshop => workshop,
                domain => view.domain.as_str(),
                spec_fingerprint => spec_fingerprint.short(),
                modules => modules,
                project => view.project.as_deref(),
                ai_guidelines => view.ai_guidelines.as_deref(),
            })
        })
        .map_err(anyhow::Error::from)?;

    let mut seed = String::with_capacity(text.len() + 65);
    seed.push_str(spec_fingerprint.as_str());
    seed.push('\n');
    seed.push_str(&text);
    let fingerprint = Fingerprint::of_bytes(seed.as_bytes());

    let digest = PreludeDigest {
        workshop_id: workshop.id.clone(),
        workshop_title: workshop.title.clone(),
        modules: view.modules.iter().map(ModuleDigest::from_module).collect(),
    };

    Ok(Prelude {
        text,
        fingerprint,
        spec_fingerprint,
        digest,
    })
}

/// Full backend request: prelude, plan output contract, then the goal.
pub fn render_request(prelude: &Prelude, goal: &Goal) -> ForgeResult<String> {
    let mut env = Environment::new();
    env.add_template("request", REQUEST_TEMPLATE)
        .map_err(anyhow::Error::from)?;
    let rendered = env
        .get_template("request")
        .and_then(|template| {
            template.render(minijinja::context! {
                prelude => prelude.text().trim_end(),
                schema => PLAN_SCHEMA.trim_end(),
                operation => goal.operation.as_str(),
                goal => goal.text.trim(),
            })
        })
        .map_err(anyhow::Error::from)?;
    Ok(rendered)
}

fn workshop_context(view: &WorkshopView) -> WorkshopContext {
    let meta = &view.workshop;
    let duration = meta
        .duration
        .as_ref()
        .map(|d| {
            format!(
                "{} groups x {} sessions ({} min each)",
                or_unset(d.groups),
                or_unset(d.sessions_per_group),
                or_unset(d.session_minutes)
            )
        })
        .unwrap_or_else(|| "unspecified".to_string());
    let policy = meta.policy.clone().unwrap_or_default();
    let outputs = meta.outputs.clone().unwrap_or_default();
    WorkshopContext {
        id: meta.id.clone().unwrap_or_else(|| "workshop".to_string()),
        title: meta.title.clone().unwrap_or_else(|| "Untitled".to_string()),
        version: meta
            .version
            .as_ref()
            .map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            })
            .unwrap_or_else(|| "unversioned".to_string()),
        audience: meta.audience.clone().unwrap_or_else(|| "unspecified".to_string()),
        duration,
        student_ai_usage: policy
            .student_ai_usage
            .unwrap_or_else(|| "unspecified".to_string()),
        license: policy.license.unwrap_or_else(|| "unspecified".to_string()),
        slides: outputs.slides,
        handouts: outputs.handouts,
    }
}

fn module_context(module: &ModuleSpec) -> ModuleContext {
    let id = module.id_or_unknown().to_string();
    ModuleContext {
        title: module.title.clone().unwrap_or_else(|| id.clone()),
        objective: module
            .objective
            .clone()
            .unwrap_or_else(|| "(missing)".to_string()),
        duration: module
            .duration_minutes
            .map(|m| format!("{m} min"))
            .unwrap_or_else(|| "(missing)".to_string()),
        deliverables: module.deliverables.clone(),
        depends_on: module.depends_on.clone(),
        id,
    }
}

fn or_unset(value: Option<u64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}
