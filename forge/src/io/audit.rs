//! Append-only audit trail under `.forge/audit/`.
//!
//! One directory per operation, named `<timestamp>-<operation>-<goal-slug>`.
//! Directories are created with `create_dir` and files with `create_new`, so
//! an existing record is never reused or overwritten.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::atomic::to_pretty_json;
use crate::core::canonical::Fingerprint;
use crate::core::plan::{Operation, Plan, render_plan_markdown};
use crate::core::policy::ComplianceReport;

const SLUG_MAX: usize = 30;
const RECORD_FILE: &str = "record.json";
const PLAN_FILE: &str = "plan.json";

/// Pipeline phases, in the order an operation passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BuildingContext,
    AwaitingPlan,
    Staging,
    EvaluatingPolicy,
    Committing,
    Aborted,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Plan produced, or check completed.
    Completed,
    /// Apply moved staged files into the target.
    Committed,
    /// Apply stopped by the policy gate.
    Blocked,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}

/// `record.json`: metadata for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub operation: Operation,
    pub goal: String,
    pub backend: Option<String>,
    pub spec_fingerprint: Option<Fingerprint>,
    pub prelude_fingerprint: Option<Fingerprint>,
    pub outcome: Outcome,
    pub error: Option<ErrorRecord>,
    /// Backend calls made, including retries.
    pub attempts: u32,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub committed: Vec<String>,
    #[serde(default)]
    pub unchanged: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
}

/// Everything one operation wants persisted.
#[derive(Debug)]
pub struct AuditEntry<'a> {
    pub operation: Operation,
    pub goal: &'a str,
    pub backend: Option<&'a str>,
    pub spec_fingerprint: Option<&'a Fingerprint>,
    pub prelude_fingerprint: Option<&'a Fingerprint>,
    pub outcome: Outcome,
    pub error: Option<ErrorRecord>,
    pub attempts: u32,
    pub phases: &'a [Phase],
    pub committed: &'a [String],
    pub unchanged: &'a [String],
    pub started_at: DateTime<Utc>,
    pub prelude: Option<&'a str>,
    pub prompt: Option<&'a str>,
    pub response: Option<&'a str>,
    pub plan: Option<&'a Plan>,
    pub report: Option<&'a ComplianceReport>,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write a new record and return its id (the directory name).
    pub fn record(&self, entry: &AuditEntry<'_>) -> Result<String> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create audit dir {}", self.dir.display()))?;
        let base = format!(
            "{}-{}-{}",
            entry.started_at.format("%Y%m%dT%H%M%S%.3fZ"),
            entry.operation,
            slugify(entry.goal)
        );
        let (id, dir) = self.create_unique(&base)?;

        let record = AuditRecord {
            id: id.clone(),
            operation: entry.operation,
            goal: entry.goal.to_string(),
            backend: entry.backend.map(str::to_string),
            spec_fingerprint: entry.spec_fingerprint.cloned(),
            prelude_fingerprint: entry.prelude_fingerprint.cloned(),
            outcome: entry.outcome,
            error: entry.error.clone(),
            attempts: entry.attempts,
            phases: entry.phases.to_vec(),
            committed: entry.committed.to_vec(),
            unchanged: entry.unchanged.to_vec(),
            started_at: entry.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        if let Some(prelude) = entry.prelude {
            write_new(&dir.join("prelude.md"), prelude)?;
        }
        if let Some(prompt) = entry.prompt {
            write_new(&dir.join("prompt.md"), prompt)?;
        }
        if let Some(response) = entry.response {
            write_new(&dir.join("response.txt"), response)?;
        }
        if let Some(plan) = entry.plan {
            write_new(&dir.join(PLAN_FILE), &to_pretty_json(plan)?)?;
            write_new(&dir.join("plan.md"), &render_plan_markdown(plan))?;
        }
        if let Some(report) = entry.report {
            write_new(&dir.join("report.json"), &to_pretty_json(report)?)?;
            write_new(&dir.join("report.md"), &report.render_markdown())?;
        }
        // Last, so `list` never sees a record with missing artifacts.
        write_new(&dir.join(RECORD_FILE), &to_pretty_json(&record)?)?;

        info!(id = %id, outcome = ?entry.outcome, "audit record written");
        Ok(id)
    }

    fn create_unique(&self, base: &str) -> Result<(String, PathBuf)> {
        for n in 1..=1000u32 {
            let id = if n == 1 {
                base.to_string()
            } else {
                format!("{base}-{n}")
            };
            let dir = self.dir.join(&id);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(id = %id, "audit id taken, trying next suffix");
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create audit record {}", dir.display()));
                }
            }
        }
        Err(anyhow!("could not allocate a unique audit id for {base}"))
    }

    /// Record ids, newest first.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let entry = entry.with_context(|| format!("read {}", self.dir.display()))?;
            if entry.path().join(RECORD_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    pub fn load_record(&self, id: &str) -> Result<AuditRecord> {
        let path = self.dir.join(id).join(RECORD_FILE);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }

    /// The plan stored with a record, if the operation got that far.
    pub fn load_plan(&self, id: &str) -> Result<Option<Plan>> {
        let path = self.dir.join(id).join(PLAN_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let plan = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(plan))
    }

    pub fn record_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }
}

fn write_new(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("write {}", path.display()))
}

/// Lowercase, dash-separated, at most 30 chars; `goal` when nothing survives.
pub fn slugify(goal: &str) -> String {
    let mut slug = String::new();
    for ch in goal.to_lowercase().chars() {
        let mapped = match ch {
            ' ' | '_' | '-' => '-',
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => c,
            _ => continue,
        };
        if mapped == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(mapped);
    }
    let mut slug: String = slug.chars().take(SLUG_MAX).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "goal".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn entry<'a>(goal: &'a str, started_at: DateTime<Utc>) -> AuditEntry<'a> {
        AuditEntry {
            operation: Operation::Plan,
            goal,
            backend: Some("echo"),
            spec_fingerprint: None,
            prelude_fingerprint: None,
            outcome: Outcome::Completed,
            error: None,
            attempts: 1,
            phases: &[Phase::BuildingContext, Phase::AwaitingPlan, Phase::Recording],
            committed: &[],
            unchanged: &[],
            started_at,
            prelude: Some("prelude"),
            prompt: None,
            response: Some("raw"),
            plan: None,
            report: None,
        }
    }

    #[test]
    fn slug_rules() {
        assert_eq!(slugify("Add Lab for Traits!"), "add-lab-for-traits");
        assert_eq!(slugify("  snake_case  goal "), "snake-case-goal");
        assert_eq!(slugify("???"), "goal");
        assert_eq!(
            slugify("a very long goal that keeps going and going"),
            "a-very-long-goal-that-keeps-go"
        );
        assert_eq!(slugify("abcdefghijklmnopqrstuvwxyz012 4"), "abcdefghijklmnopqrstuvwxyz012");
    }

    #[test]
    fn records_are_unique_and_listed_newest_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("audit"));
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("t1");
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).single().expect("t2");

        let a = log.record(&entry("test", t1)).expect("a");
        let b = log.record(&entry("test", t1)).expect("b");
        let c = log.record(&entry("other", t2)).expect("c");

        assert_eq!(a, "20260301T100000.000Z-plan-test");
        assert_eq!(b, "20260301T100000.000Z-plan-test-2");
        assert_eq!(log.list().expect("list"), vec![c, b, a.clone()]);

        let record = log.load_record(&a).expect("record");
        assert_eq!(record.goal, "test");
        assert_eq!(record.phases.last(), Some(&Phase::Recording));
        assert_eq!(
            fs::read_to_string(log.record_dir(&a).join("response.txt")).expect("response"),
            "raw"
        );
        assert!(!log.record_dir(&a).join("prompt.md").exists());
        assert_eq!(log.load_plan(&a).expect("plan"), None);
    }

    #[test]
    fn list_on_missing_dir_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("nope"));
        assert!(log.list().expect("list").is_empty());
    }

    #[test]
    fn interrupted_records_are_not_listed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("audit"));
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("t1");
        let id = log.record(&entry("test", t1)).expect("record");

        let record_time = fs::metadata(log.record_dir(&id).join(RECORD_FILE))
            .and_then(|m| m.modified())
            .expect("record mtime");
        for artifact in ["prelude.md", "response.txt"] {
            let artifact_time = fs::metadata(log.record_dir(&id).join(artifact))
                .and_then(|m| m.modified())
                .expect("artifact mtime");
            assert!(artifact_time <= record_time, "{artifact} written after record.json");
        }

        let partial = log.record_dir("20260301T120000.000Z-plan-partial");
        fs::create_dir_all(&partial).expect("partial dir");
        fs::write(partial.join("prelude.md"), "prelude").expect("partial artifact");
        assert_eq!(log.list().expect("list"), vec![id]);
    }
}
