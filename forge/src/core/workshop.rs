//! Typed, lenient view over the workshop documents in a snapshot.
//!
//! Fields are optional on purpose: the view feeds both the prelude and the
//! completeness rules, and the rules are the ones that report missing data.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::canonical::SpecificationSnapshot;
use crate::error::{ForgeError, ForgeResult};

pub const WORKSHOP_DOC: &str = "workshop";
pub const MODULES_DOC: &str = "modules";
pub const PROFILE_DOC: &str = "profile";
pub const PROJECT_DOC: &str = "project";
pub const GUIDELINES_DOC: &str = "ai_guidelines";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkshopMeta {
    pub id: Option<String>,
    pub title: Option<String>,
    pub version: Option<Value>,
    pub audience: Option<String>,
    pub duration: Option<DurationSpec>,
    pub policy: Option<WorkshopPolicy>,
    pub outputs: Option<Outputs>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DurationSpec {
    pub groups: Option<u64>,
    pub sessions_per_group: Option<u64>,
    pub session_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkshopPolicy {
    pub student_ai_usage: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Outputs {
    pub slides: bool,
    pub handouts: bool,
}

impl Default for Outputs {
    fn default() -> Self {
        Self {
            slides: true,
            handouts: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModuleSpec {
    pub id: Option<String>,
    pub title: Option<String>,
    pub objective: Option<String>,
    pub duration_minutes: Option<i64>,
    pub deliverables: Vec<String>,
    pub depends_on: Vec<String>,
}

impl ModuleSpec {
    pub fn id_or_unknown(&self) -> &str {
        self.id.as_deref().unwrap_or("unknown")
    }

    /// Spec reference in `modules#<id>` form.
    pub fn spec_ref(&self) -> String {
        format!("{MODULES_DOC}#{}", self.id_or_unknown())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct ModulesDoc {
    modules: Vec<ModuleSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct ProfileDoc {
    domain: Option<String>,
}

/// Everything the prelude and policy rules read from the specification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkshopView {
    pub workshop: WorkshopMeta,
    pub modules: Vec<ModuleSpec>,
    pub domain: String,
    pub project: Option<String>,
    pub ai_guidelines: Option<String>,
}

impl WorkshopView {
    pub fn from_snapshot(snapshot: &SpecificationSnapshot) -> ForgeResult<Self> {
        let workshop: WorkshopMeta = read_doc(snapshot, WORKSHOP_DOC)?.unwrap_or_default();
        let modules: ModulesDoc = read_doc(snapshot, MODULES_DOC)?.unwrap_or_default();
        let profile: ProfileDoc = read_doc(snapshot, PROFILE_DOC)?.unwrap_or_default();
        Ok(Self {
            workshop,
            modules: modules.modules,
            domain: profile.domain.unwrap_or_else(|| "general".to_string()),
            project: read_text(snapshot, PROJECT_DOC),
            ai_guidelines: read_text(snapshot, GUIDELINES_DOC),
        })
    }

    /// All declared deliverables, sorted and deduplicated.
    pub fn deliverables(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .modules
            .iter()
            .flat_map(|m| m.deliverables.iter().cloned())
            .collect();
        all.sort();
        all.dedup();
        all
    }

    pub fn module(&self, id: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.id.as_deref() == Some(id))
    }
}

fn read_doc<T: DeserializeOwned>(
    snapshot: &SpecificationSnapshot,
    name: &str,
) -> ForgeResult<Option<T>> {
    let Some(doc) = snapshot.document(name) else {
        return Ok(None);
    };
    if doc.is_null() {
        return Ok(None);
    }
    serde_json::from_value(doc.clone())
        .map(Some)
        .map_err(|err| ForgeError::malformed(name, err.to_string()))
}

fn read_text(snapshot: &SpecificationSnapshot, name: &str) -> Option<String> {
    snapshot
        .document(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
