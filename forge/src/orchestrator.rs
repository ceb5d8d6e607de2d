//! Plan, apply and check pipelines over one workshop directory.
//!
//! Each operation takes the workshop lock, walks the phases
//! `BuildingContext -> AwaitingPlan -> Staging -> EvaluatingPolicy ->
//! {Committing | Aborted} -> Recording`, and always ends by writing an audit
//! record, whether it succeeded or not. The target tree is only written in
//! `Committing`, after every step is staged and the policy gate has passed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, instrument, warn};

use crate::backend::retry::{Attempted, complete_with_retry};
use crate::backend::{Backend, CompletionRequest, GenerationBackend};
use crate::core::canonical::{Fingerprint, SpecificationSnapshot, build};
use crate::core::plan::{Goal, Operation, Plan, parse_plan};
use crate::core::policy::{ComplianceReport, PolicyEngine};
use crate::core::prelude::{Prelude, render, render_request};
use crate::error::{ForgeError, ForgeResult};
use crate::io::atomic::write_atomic;
use crate::io::audit::{AuditEntry, AuditLog, ErrorRecord, Outcome, Phase};
use crate::io::config::{ForgeConfig, load_config};
use crate::io::init::ForgePaths;
use crate::io::lock::ForgeLock;
use crate::io::session::{SessionState, load_session, save_session};
use crate::io::spec_source::load_spec_tree;
use crate::io::staging::{CommitSummary, stage_plan};
use crate::io::tree_scan::scan_tree;

/// Goal text recorded for `check`, which has no operator goal.
const CHECK_GOAL: &str = "check";

/// A workshop directory plus the configuration it was opened with.
#[derive(Debug, Clone)]
pub struct Workspace {
    paths: ForgePaths,
    config: ForgeConfig,
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub prelude: Prelude,
    pub audit_id: String,
}

/// What `apply` should do.
#[derive(Debug, Clone, Default)]
pub struct ApplyRequest {
    pub goal: String,
    /// Previously produced plan to reuse instead of calling the backend.
    pub plan: Option<Plan>,
    /// Rule ids whose error-severity violations do not block the commit.
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub plan: Plan,
    pub report: ComplianceReport,
    pub committed: Vec<String>,
    /// Steps whose target already held the proposed content.
    pub unchanged: Vec<String>,
    pub audit_id: String,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub report: ComplianceReport,
    pub audit_id: String,
}

/// Everything one operation accumulates on its way to the audit record.
struct Run {
    operation: Operation,
    goal: String,
    started_at: DateTime<Utc>,
    phases: Vec<Phase>,
    backend: Option<String>,
    spec_fingerprint: Option<Fingerprint>,
    prelude: Option<Prelude>,
    prompt: Option<String>,
    response: Option<String>,
    plan: Option<Plan>,
    report: Option<ComplianceReport>,
    attempts: u32,
    commit: CommitSummary,
}

impl Run {
    fn new(operation: Operation, goal: &str) -> Self {
        Self {
            operation,
            goal: goal.to_string(),
            started_at: Utc::now(),
            phases: Vec::new(),
            backend: None,
            spec_fingerprint: None,
            prelude: None,
            prompt: None,
            response: None,
            plan: None,
            report: None,
            attempts: 0,
            commit: CommitSummary::default(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!(operation = %self.operation, ?phase, "phase");
        self.phases.push(phase);
    }
}

impl Workspace {
    /// Open `root`, reading `.forge/config.toml` when present.
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let paths = ForgePaths::new(root);
        let config = load_config(&paths.config_path)?;
        Ok(Self { paths, config })
    }

    pub fn with_config(root: impl Into<PathBuf>, config: ForgeConfig) -> Self {
        Self {
            paths: ForgePaths::new(root),
            config,
        }
    }

    pub fn paths(&self) -> &ForgePaths {
        &self.paths
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn target_dir(&self) -> PathBuf {
        self.paths.target_dir(&self.config)
    }

    pub fn audit_log(&self) -> AuditLog {
        AuditLog::new(&self.paths.audit_dir)
    }

    /// The backend selected by `[backend]` in the config.
    pub fn backend(&self) -> Backend {
        self.config.backend.build(&self.paths.root)
    }

    /// Load `spec/` and canonicalize it.
    pub fn snapshot(&self) -> ForgeResult<SpecificationSnapshot> {
        let tree = load_spec_tree(&self.paths.spec_dir)?;
        build(&tree)
    }

    /// Render the prelude for the current spec without calling any backend.
    pub fn prelude(&self) -> ForgeResult<Prelude> {
        render(&self.snapshot()?)
    }

    /// Produce a plan for `goal` and record it. The target tree is not touched.
    #[instrument(skip_all, fields(goal = %goal, backend = backend.name()))]
    pub fn plan<B: GenerationBackend + ?Sized>(
        &self,
        goal: &str,
        backend: &B,
    ) -> ForgeResult<PlanOutcome> {
        let mut run = Run::new(Operation::Plan, goal);
        run.backend = Some(backend.name().to_string());
        let (lock, result) = match ForgeLock::acquire(&self.paths.lock_path, Operation::Plan) {
            Ok(lock) => {
                let result = self.run_plan(&mut run, backend);
                (Some(lock), result)
            }
            Err(err) => (None, Err(err)),
        };
        let audit_id = self.finish(&mut run, &result)?;
        drop(lock);

        let plan = result?;
        let prelude = run
            .prelude
            .take()
            .context("prelude missing after a successful plan")?;
        Ok(PlanOutcome {
            plan,
            prelude,
            audit_id,
        })
    }

    fn run_plan<B: GenerationBackend + ?Sized>(
        &self,
        run: &mut Run,
        backend: &B,
    ) -> ForgeResult<Plan> {
        run.enter(Phase::BuildingContext);
        let snapshot = self.snapshot()?;
        run.spec_fingerprint = Some(snapshot.fingerprint().clone());
        let prelude = render(&snapshot)?;
        run.prelude = Some(prelude.clone());

        let goal = Goal::new(run.goal.clone(), Operation::Plan);
        let plan = self.generate(run, &goal, &snapshot, &prelude, backend)?;

        let previous = load_session(&self.paths.session_path)?.unwrap_or_default();
        save_session(
            &self.paths.session_path,
            &SessionState {
                spec_fingerprint: Some(snapshot.fingerprint().clone()),
                last_goal: Some(run.goal.clone()),
                last_backend: Some(backend.name().to_string()),
                last_operation: Some(Operation::Plan),
                updated_at: Some(now_rfc3339()),
                last_check_at: previous.last_check_at,
            },
        )?;
        run.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Call the backend (with retry) and parse its answer.
    fn generate<B: GenerationBackend + ?Sized>(
        &self,
        run: &mut Run,
        goal: &Goal,
        snapshot: &SpecificationSnapshot,
        prelude: &Prelude,
        backend: &B,
    ) -> ForgeResult<Plan> {
        run.enter(Phase::AwaitingPlan);
        let prompt = render_request(prelude, goal)?;
        let request = CompletionRequest {
            prelude,
            goal,
            prompt: &prompt,
            timeout: self.config.backend.timeout(),
        };
        let Attempted { result, attempts } =
            complete_with_retry(backend, &request, &self.config.retry);
        run.prompt = Some(prompt.clone());
        run.attempts = attempts;
        let response = result.map_err(|source| ForgeError::Backend { source, attempts })?;
        debug!(attempts, bytes = response.text.len(), "backend responded");

        let parsed = parse_plan(
            &response.text,
            &goal.text,
            snapshot.fingerprint(),
            backend.name(),
        );
        run.response = Some(response.text);
        parsed
    }

    /// Stage, gate and commit a plan into the target directory.
    ///
    /// Fails with [`ForgeError::SpecDrift`] before any backend call or write
    /// when the spec changed since the last recorded plan, or since the
    /// supplied plan was produced.
    #[instrument(skip_all, fields(goal = %request.goal, backend = backend.name()))]
    pub fn apply<B: GenerationBackend + ?Sized>(
        &self,
        request: &ApplyRequest,
        backend: &B,
    ) -> ForgeResult<ApplyOutcome> {
        let mut run = Run::new(Operation::Apply, &request.goal);
        run.backend = Some(match &request.plan {
            Some(plan) => plan.backend.clone(),
            None => backend.name().to_string(),
        });
        let (lock, result) = match ForgeLock::acquire(&self.paths.lock_path, Operation::Apply) {
            Ok(lock) => {
                let result = self.run_apply(&mut run, request, backend);
                (Some(lock), result)
            }
            Err(err) => (None, Err(err)),
        };
        let audit_id = self.finish(&mut run, &result)?;
        drop(lock);

        let report = result?;
        let plan = run
            .plan
            .take()
            .context("plan missing after a successful apply")?;
        Ok(ApplyOutcome {
            plan,
            report,
            committed: run.commit.committed,
            unchanged: run.commit.unchanged,
            audit_id,
        })
    }

    fn run_apply<B: GenerationBackend + ?Sized>(
        &self,
        run: &mut Run,
        request: &ApplyRequest,
        backend: &B,
    ) -> ForgeResult<ComplianceReport> {
        run.enter(Phase::BuildingContext);
        let snapshot = self.snapshot()?;
        let current = snapshot.fingerprint().clone();
        run.spec_fingerprint = Some(current.clone());
        let prelude = render(&snapshot)?;
        run.prelude = Some(prelude.clone());

        let previous = load_session(&self.paths.session_path)?;
        if let Some(recorded) = previous.as_ref().and_then(|s| s.spec_fingerprint.as_ref()) {
            check_drift(recorded, &current)?;
        }
        if let Some(plan) = &request.plan {
            check_drift(&plan.spec_fingerprint, &current)?;
        }

        let plan = match &request.plan {
            Some(plan) => {
                run.enter(Phase::AwaitingPlan);
                debug!(steps = plan.steps.len(), "reusing supplied plan");
                plan.clone()
            }
            None => {
                let goal = Goal::new(run.goal.clone(), Operation::Apply);
                self.generate(run, &goal, &snapshot, &prelude, backend)?
            }
        };
        run.plan = Some(plan.clone());

        run.enter(Phase::Staging);
        let target = self.target_dir();
        let staging_id = format!(
            "{}-{}",
            run.started_at.format("%Y%m%dT%H%M%S%.3fZ"),
            std::process::id()
        );
        let staging = stage_plan(&self.paths.staging_dir, &staging_id, &target, &plan)?;

        let gated = (|| -> ForgeResult<(ComplianceReport, CommitSummary)> {
            run.enter(Phase::EvaluatingPolicy);
            let engine = PolicyEngine::new(self.config.policy.clone())?;
            let mut tree = scan_tree(&target)?;
            tree.overlay(staging.contents());
            let report = engine.evaluate(&tree, &snapshot)?;
            run.report = Some(report.clone());

            let blocking = report.blocking(&request.allowed);
            if !blocking.is_empty() {
                info!(blocking = blocking.len(), "policy gate blocked the commit");
                return Err(ForgeError::PolicyViolation {
                    report: Box::new(report),
                });
            }

            run.enter(Phase::Committing);
            let summary = staging.commit()?;
            Ok((report, summary))
        })();
        staging.cleanup();
        let (report, summary) = gated?;
        run.commit = summary;

        // Past this point the target is committed: failures are logged, not returned.
        let session = SessionState {
            spec_fingerprint: Some(current),
            last_goal: Some(run.goal.clone()),
            last_backend: Some(plan.backend.clone()),
            last_operation: Some(Operation::Apply),
            updated_at: Some(now_rfc3339()),
            last_check_at: previous.and_then(|s| s.last_check_at),
        };
        if let Err(err) = save_session(&self.paths.session_path, &session) {
            warn!(err = %format!("{err:#}"), "could not save session state after commit");
        }
        Ok(report)
    }

    /// Evaluate policy over the configured target as it is.
    pub fn check(&self) -> ForgeResult<CheckOutcome> {
        self.check_target(&self.target_dir())
    }

    /// Evaluate policy over `target` as it is. Writes only reports, the
    /// audit record and the session's `last_check_at`.
    #[instrument(skip_all, fields(target = %target.display()))]
    pub fn check_target(&self, target: &Path) -> ForgeResult<CheckOutcome> {
        let mut run = Run::new(Operation::Check, CHECK_GOAL);
        let (lock, result) = match ForgeLock::acquire(&self.paths.lock_path, Operation::Check) {
            Ok(lock) => {
                let result = self.run_check(&mut run, target);
                (Some(lock), result)
            }
            Err(err) => (None, Err(err)),
        };
        let audit_id = self.finish(&mut run, &result)?;
        drop(lock);

        Ok(CheckOutcome {
            report: result?,
            audit_id,
        })
    }

    fn run_check(&self, run: &mut Run, target: &Path) -> ForgeResult<ComplianceReport> {
        run.enter(Phase::BuildingContext);
        let snapshot = self.snapshot()?;
        run.spec_fingerprint = Some(snapshot.fingerprint().clone());

        run.enter(Phase::EvaluatingPolicy);
        let engine = PolicyEngine::new(self.config.policy.clone())?;
        let tree = scan_tree(target)?;
        let report = engine.evaluate(&tree, &snapshot)?;
        run.report = Some(report.clone());

        write_report(&self.paths.compliance_json_path(), &report.to_json()?)?;
        write_report(&self.paths.compliance_md_path(), &report.render_markdown())?;

        let mut session = load_session(&self.paths.session_path)?.unwrap_or_default();
        session.last_check_at = Some(now_rfc3339());
        save_session(&self.paths.session_path, &session)?;
        info!(errors = report.errors, warnings = report.warnings, "check finished");
        Ok(report)
    }

    /// Recording phase: write the audit record for `run`.
    ///
    /// An audit failure after a failed operation is logged and the original
    /// error wins.
    fn finish<T>(&self, run: &mut Run, result: &ForgeResult<T>) -> ForgeResult<String> {
        let (outcome, error) = match result {
            Ok(_) if run.operation == Operation::Apply => (Outcome::Committed, None),
            Ok(_) => (Outcome::Completed, None),
            Err(err) => {
                if run.phases.last() != Some(&Phase::Aborted) {
                    run.enter(Phase::Aborted);
                }
                let outcome = match err {
                    ForgeError::PolicyViolation { .. } => Outcome::Blocked,
                    _ => Outcome::Failed,
                };
                let record = ErrorRecord {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                };
                (outcome, Some(record))
            }
        };
        run.enter(Phase::Recording);

        let entry = AuditEntry {
            operation: run.operation,
            goal: &run.goal,
            backend: run.backend.as_deref(),
            spec_fingerprint: run.spec_fingerprint.as_ref(),
            prelude_fingerprint: run.prelude.as_ref().map(Prelude::fingerprint),
            outcome,
            error,
            attempts: run.attempts,
            phases: &run.phases,
            committed: &run.commit.committed,
            unchanged: &run.commit.unchanged,
            started_at: run.started_at,
            prelude: run.prelude.as_ref().map(Prelude::text),
            prompt: run.prompt.as_deref(),
            response: run.response.as_deref(),
            plan: run.plan.as_ref(),
            report: run.report.as_ref(),
        };
        match self.audit_log().record(&entry) {
            Ok(id) => Ok(id),
            Err(err) if result.is_err() => {
                warn!(
                    err = %format!("{err:#}"),
                    "could not write audit record for failed operation"
                );
                Ok(String::new())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn check_drift(recorded: &Fingerprint, current: &Fingerprint) -> ForgeResult<()> {
    if recorded == current {
        return Ok(());
    }
    warn!(recorded = recorded.short(), current = current.short(), "specification drift");
    Err(ForgeError::SpecDrift {
        recorded: recorded.to_string(),
        current: current.to_string(),
    })
}

fn write_report(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    write_atomic(path, contents.as_bytes())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
