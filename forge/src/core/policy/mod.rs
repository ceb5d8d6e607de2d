//! Policy engine: evaluates named rules over a file tree and the workshop spec.
//!
//! The engine only reports. Deciding whether a report blocks a commit is the
//! orchestrator's job (see [`ComplianceReport::blocking`]).

pub mod rules;
pub mod slides;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::canonical::SpecificationSnapshot;
use crate::core::tree::TreeView;
use crate::core::workshop::WorkshopView;
use crate::error::{ForgeError, ForgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warn,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warn => f.write_str("warn"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

/// What a rule reports; severity is attached by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub message: String,
    pub path: Option<String>,
}

impl Finding {
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Some(path.into()),
        }
    }
}

/// Inputs every rule sees. Rules never see each other's output.
pub struct RuleContext<'a> {
    pub tree: &'a TreeView,
    pub workshop: &'a WorkshopView,
    pub settings: &'a PolicySettings,
    pub forbidden: &'a [Regex],
    pub module_id: &'a Regex,
}

pub trait PolicyRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn default_severity(&self) -> Severity;
    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding>;
}

/// Per-profile rule configuration (`[policy]` in `.forge/config.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Severity overrides keyed by rule id.
    pub severity: BTreeMap<String, Severity>,
    /// Rule ids that are not evaluated at all.
    pub disabled: Vec<String>,
    pub forbidden_patterns: Vec<String>,
    /// Student-facing directories scanned for forbidden patterns.
    pub student_dirs: Vec<String>,
    pub required_dirs: Vec<String>,
    pub readme_terms: Vec<String>,
    pub module_id_pattern: String,
    pub slides_dir: String,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            severity: BTreeMap::new(),
            disabled: Vec::new(),
            forbidden_patterns: vec!["TODO".into(), "FIXME".into(), "XXX".into()],
            student_dirs: vec!["labs".into()],
            required_dirs: vec!["instructor".into(), "reference".into()],
            readme_terms: vec!["spec".into()],
            module_id_pattern: "^[a-z0-9-]+$".into(),
            slides_dir: "instructor/slides".into(),
        }
    }
}

impl PolicySettings {
    pub fn validate(&self) -> ForgeResult<()> {
        let known: BTreeSet<&str> = rules::default_rules().iter().map(|r| r.id()).collect();
        for id in self.severity.keys().chain(self.disabled.iter()) {
            if !known.contains(id.as_str()) {
                return Err(ForgeError::Config(format!("unknown policy rule '{id}'")));
            }
        }
        compile_patterns(self)?;
        Ok(())
    }
}

fn compile_patterns(settings: &PolicySettings) -> ForgeResult<(Vec<Regex>, Regex)> {
    let forbidden = settings
        .forbidden_patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|err| ForgeError::Config(format!("forbidden pattern '{p}': {err}")))
        })
        .collect::<ForgeResult<Vec<_>>>()?;
    let module_id = Regex::new(&settings.module_id_pattern).map_err(|err| {
        ForgeError::Config(format!(
            "module_id_pattern '{}': {err}",
            settings.module_id_pattern
        ))
    })?;
    Ok((forbidden, module_id))
}

/// Severity-classified, deterministically ordered rule results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub errors: usize,
    pub warnings: usize,
    pub violations: Vec<Violation>,
}

impl ComplianceReport {
    pub fn from_violations(mut violations: Vec<Violation>) -> Self {
        violations.sort();
        violations.dedup();
        let errors = violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .count();
        Self {
            errors,
            warnings: violations.len() - errors,
            violations,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Error-severity violations whose rule is not in `allowed`.
    pub fn blocking(&self, allowed: &[String]) -> Vec<&Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error && !allowed.contains(&v.rule_id))
            .collect()
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> ForgeResult<String> {
        let mut buf = serde_json::to_string_pretty(self).map_err(anyhow::Error::from)?;
        buf.push('\n');
        Ok(buf)
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::from("# Compliance Report\n\n");
        out.push_str(&format!(
            "{} error(s), {} warning(s)\n",
            self.errors, self.warnings
        ));
        if self.is_clean() {
            out.push_str("\nNo violations found.\n");
            return out;
        }
        for (severity, heading) in [(Severity::Error, "Errors"), (Severity::Warn, "Warnings")] {
            let group: Vec<&Violation> = self
                .violations
                .iter()
                .filter(|v| v.severity == severity)
                .collect();
            if group.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {heading}\n\n"));
            for v in group {
                match &v.path {
                    Some(path) => out.push_str(&format!(
                        "- `{}` {} (`{}`)\n",
                        v.rule_id, v.message, path
                    )),
                    None => out.push_str(&format!("- `{}` {}\n", v.rule_id, v.message)),
                }
            }
        }
        out
    }
}

/// Ordered rule set plus the settings it runs with.
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
    settings: PolicySettings,
    forbidden: Vec<Regex>,
    module_id: Regex,
}

impl PolicyEngine {
    /// Default rule set configured by `settings`.
    pub fn new(settings: PolicySettings) -> ForgeResult<Self> {
        Self::with_rules(rules::default_rules(), settings)
    }

    pub fn with_rules(
        rules: Vec<Box<dyn PolicyRule>>,
        settings: PolicySettings,
    ) -> ForgeResult<Self> {
        let (forbidden, module_id) = compile_patterns(&settings)?;
        Ok(Self {
            rules,
            settings,
            forbidden,
            module_id,
        })
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn evaluate(
        &self,
        tree: &TreeView,
        snapshot: &SpecificationSnapshot,
    ) -> ForgeResult<ComplianceReport> {
        let workshop = WorkshopView::from_snapshot(snapshot)?;
        Ok(self.evaluate_view(tree, &workshop))
    }

    pub fn evaluate_view(&self, tree: &TreeView, workshop: &WorkshopView) -> ComplianceReport {
        let ctx = RuleContext {
            tree,
            workshop,
            settings: &self.settings,
            forbidden: &self.forbidden,
            module_id: &self.module_id,
        };
        let mut violations = Vec::new();
        for rule in &self.rules {
            if self.settings.disabled.iter().any(|id| id == rule.id()) {
                continue;
            }
            let severity = self
                .settings
                .severity
                .get(rule.id())
                .copied()
                .unwrap_or_else(|| rule.default_severity());
            violations.extend(rule.check(&ctx).into_iter().map(|finding| Violation {
                severity,
                rule_id: rule.id().to_string(),
                path: finding.path,
                message: finding.message,
            }));
        }
        ComplianceReport::from_violations(violations)
    }
}
