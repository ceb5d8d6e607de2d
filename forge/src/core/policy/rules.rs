//! Default rule set.

use super::slides;
use super::{Finding, PolicyRule, RuleContext, Severity};
use crate::core::tree::normalize_path;

pub fn default_rules() -> Vec<Box<dyn PolicyRule>> {
    vec![
        Box::new(ModuleCompleteness),
        Box::new(DeliverableExistence),
        Box::new(ReadmeRequirements),
        Box::new(InstructorSeparation),
        Box::new(ForbiddenPatterns),
        Box::new(NamingConvention),
        Box::new(SlideContentQuality),
    ]
}

/// Every module declares an objective, deliverables and a positive duration.
pub struct ModuleCompleteness;

impl PolicyRule for ModuleCompleteness {
    fn id(&self) -> &'static str {
        "module-completeness"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for module in &ctx.workshop.modules {
            let id = module.id_or_unknown();
            let at = module.spec_ref();
            if module.objective.as_deref().is_none_or(|o| o.trim().is_empty()) {
                findings.push(Finding::at(&at, format!("module '{id}' missing objective")));
            }
            if module.deliverables.is_empty() {
                findings.push(Finding::at(&at, format!("module '{id}' has no deliverables")));
            }
            match module.duration_minutes {
                Some(minutes) if minutes > 0 => {}
                Some(minutes) => findings.push(Finding::at(
                    &at,
                    format!("module '{id}' has invalid duration: {minutes}"),
                )),
                None => findings.push(Finding::at(&at, format!("module '{id}' missing duration"))),
            }
        }
        findings
    }
}

pub struct DeliverableExistence;

impl PolicyRule for DeliverableExistence {
    fn id(&self) -> &'static str {
        "deliverable-existence"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        ctx.workshop
            .deliverables()
            .into_iter()
            .filter(|d| !ctx.tree.has_file(d) && !ctx.tree.has_dir(d))
            .map(|d| Finding::at(d.clone(), format!("deliverable not found: {d}")))
            .collect()
    }
}

/// Root README exists and mentions the configured terms (case-insensitive).
pub struct ReadmeRequirements;

impl PolicyRule for ReadmeRequirements {
    fn id(&self) -> &'static str {
        "readme-requirements"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warn
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let Some(readme) = ctx.tree.contents("README.md") else {
            return vec![Finding::at("README.md", "README.md not found in workshop root")];
        };
        let lowered = readme.to_lowercase();
        ctx.settings
            .readme_terms
            .iter()
            .filter(|term| !lowered.contains(&term.to_lowercase()))
            .map(|term| Finding::at("README.md", format!("README should mention '{term}'")))
            .collect()
    }
}

pub struct InstructorSeparation;

impl PolicyRule for InstructorSeparation {
    fn id(&self) -> &'static str {
        "instructor-separation"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        ctx.settings
            .required_dirs
            .iter()
            .filter(|dir| !ctx.tree.has_dir(dir))
            .map(|dir| {
                let shown = format!("{}/", dir.trim_end_matches('/'));
                Finding::at(shown.clone(), format!("{shown} directory not found"))
            })
            .collect()
    }
}

/// One finding per student-facing markdown file, naming the first pattern hit.
pub struct ForbiddenPatterns;

impl PolicyRule for ForbiddenPatterns {
    fn id(&self) -> &'static str {
        "forbidden-patterns"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warn
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for dir in &ctx.settings.student_dirs {
            for (path, contents) in ctx.tree.files_under(dir) {
                if !path.ends_with(".md") {
                    continue;
                }
                let hit = ctx
                    .forbidden
                    .iter()
                    .zip(&ctx.settings.forbidden_patterns)
                    .find(|(re, _)| re.is_match(contents));
                if let Some((_, pattern)) = hit {
                    findings.push(Finding::at(
                        path,
                        format!("found '{pattern}' in student materials"),
                    ));
                }
            }
        }
        findings
    }
}

pub struct NamingConvention;

impl PolicyRule for NamingConvention {
    fn id(&self) -> &'static str {
        "naming-convention"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warn
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        ctx.workshop
            .modules
            .iter()
            .filter(|m| !ctx.module_id.is_match(m.id.as_deref().unwrap_or("")))
            .map(|m| {
                Finding::at(
                    m.spec_ref(),
                    format!(
                        "module id '{}' does not match {}",
                        m.id.as_deref().unwrap_or(""),
                        ctx.settings.module_id_pattern
                    ),
                )
            })
            .collect()
    }
}

/// Slide decks directly under the slides dir stay within cognitive-load budgets.
pub struct SlideContentQuality;

impl PolicyRule for SlideContentQuality {
    fn id(&self) -> &'static str {
        "slide-content-quality"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let dir = normalize_path(&ctx.settings.slides_dir);
        let prefix = format!("{dir}/");
        let mut findings = Vec::new();
        for (path, contents) in ctx.tree.files_under(&dir) {
            let Some(name) = path.strip_prefix(&prefix) else {
                continue;
            };
            if name.contains('/') || !name.ends_with(".md") {
                continue;
            }
            for finding in slides::check_deck(contents) {
                findings.push(Finding::at(
                    path,
                    format!("line {}: [{}] {}", finding.line, finding.check, finding.message),
                ));
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;
    use crate::core::policy::PolicySettings;
    use crate::core::tree::TreeView;
    use crate::core::workshop::{ModuleSpec, WorkshopView};

    fn run(rule: &dyn PolicyRule, tree: &TreeView, workshop: &WorkshopView) -> Vec<Finding> {
        run_with(rule, tree, workshop, &PolicySettings::default())
    }

    fn run_with(
        rule: &dyn PolicyRule,
        tree: &TreeView,
        workshop: &WorkshopView,
        settings: &PolicySettings,
    ) -> Vec<Finding> {
        let forbidden: Vec<Regex> = settings
            .forbidden_patterns
            .iter()
            .map(|p| Regex::new(p).expect("regex"))
            .collect();
        let module_id = Regex::new(&settings.module_id_pattern).expect("regex");
        let ctx = RuleContext {
            tree,
            workshop,
            settings,
            forbidden: &forbidden,
            module_id: &module_id,
        };
        rule.check(&ctx)
    }

    #[test]
    fn module_completeness_reports_each_gap() {
        let workshop = WorkshopView {
            modules: vec![ModuleSpec {
                id: Some("intro".to_string()),
                duration_minutes: Some(0),
                ..ModuleSpec::default()
            }],
            ..WorkshopView::default()
        };
        let findings = run(&ModuleCompleteness, &TreeView::new(), &workshop);
        let messages: Vec<&str> = findings.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "module 'intro' missing objective",
                "module 'intro' has no deliverables",
                "module 'intro' has invalid duration: 0",
            ]
        );
        assert!(findings.iter().all(|f| f.path.as_deref() == Some("modules#intro")));
    }

    #[test]
    fn readme_terms_are_case_insensitive() {
        let mut tree = TreeView::new();
        tree.insert_file("README.md", "A SPEC-driven workshop");
        assert!(run(&ReadmeRequirements, &tree, &WorkshopView::default()).is_empty());

        let mut tree = TreeView::new();
        tree.insert_file("README.md", "A workshop");
        let findings = run(&ReadmeRequirements, &tree, &WorkshopView::default());
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn forbidden_patterns_report_once_per_file() {
        let mut tree = TreeView::new();
        tree.insert_file("labs/a/README.md", "TODO and FIXME and XXX");
        tree.insert_file("labs/a/main.rs", "// TODO");
        tree.insert_file("instructor/notes.md", "TODO");
        let findings = run(&ForbiddenPatterns, &tree, &WorkshopView::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].path.as_deref(), Some("labs/a/README.md"));
        assert!(findings[0].message.contains("'TODO'"));
    }

    #[test]
    fn separation_reports_missing_dirs() {
        let mut tree = TreeView::new();
        tree.insert_file("instructor/guide.md", "");
        let findings = run(&InstructorSeparation, &tree, &WorkshopView::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].path.as_deref(), Some("reference/"));
    }

    #[test]
    fn slides_outside_the_deck_dir_are_ignored() {
        let six = "- a\n- b\n- c\n- d\n- e\n- f\n";
        let mut tree = TreeView::new();
        tree.insert_file("instructor/slides/01-intro.md", six);
        tree.insert_file("instructor/slides/drafts/old.md", six);
        tree.insert_file("labs/slides.md", six);
        let findings = run(&SlideContentQuality, &tree, &WorkshopView::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].path.as_deref(),
            Some("instructor/slides/01-intro.md")
        );
        assert!(findings[0].message.starts_with("line 1: [bullet-count]"));
    }

    #[test]
    fn slides_dir_spelling_does_not_shift_deck_names() {
        let six = "- a\n- b\n- c\n- d\n- e\n- f\n";
        let mut tree = TreeView::new();
        tree.insert_file("instructor/slides/aé.md", six);
        tree.insert_file("instructor/slides/nested/b.md", six);
        let workshop = WorkshopView::default();

        for slides_dir in ["./instructor/slides", "instructor/slides/", "/instructor/slides"] {
            let settings = PolicySettings {
                slides_dir: slides_dir.to_string(),
                ..PolicySettings::default()
            };
            let findings = run_with(&SlideContentQuality, &tree, &workshop, &settings);
            assert_eq!(findings.len(), 1, "{slides_dir}");
            assert_eq!(findings[0].path.as_deref(), Some("instructor/slides/aé.md"));
        }
    }
}
