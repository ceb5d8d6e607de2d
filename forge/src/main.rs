//! `forge`: plan, apply and check spec-driven workshop changes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use forge::backend::{BackendKind, GenerationBackend};
use forge::core::plan::{Plan, render_plan_markdown};
use forge::error::{ForgeError, ForgeResult};
use forge::exit_codes;
use forge::explain::explain;
use forge::io::atomic::to_pretty_json;
use forge::io::config::ForgeConfig;
use forge::io::init::{InitOptions, init_forge};
use forge::logging;
use forge::orchestrator::{ApplyRequest, Workspace};

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Spec-driven, policy-gated generation of workshop materials"
)]
struct Cli {
    /// Workshop directory (holds `spec/` and `.forge/`).
    #[arg(short = 'C', long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.forge/` with a default config.
    Init {
        /// Rewrite the config if `.forge/` already exists.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the prelude a backend would receive, without calling it.
    Prelude,
    /// Ask the backend for a plan. Nothing outside `.forge/` is written.
    Plan {
        goal: String,
        /// Override `[backend].kind` from the config.
        #[arg(long, value_parser = parse_backend)]
        backend: Option<BackendKind>,
        /// Also write the plan JSON here, for a later `apply --plan`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Stage, policy-check and commit a plan into the target directory.
    Apply {
        goal: String,
        /// Reuse a plan written by `plan --out` instead of calling the backend.
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Rule id whose error violations should not block the commit (repeatable).
        #[arg(long = "allow")]
        allow: Vec<String>,
        #[arg(long, value_parser = parse_backend)]
        backend: Option<BackendKind>,
    },
    /// Evaluate policy over the target directory as it is.
    Check {
        /// Directory to evaluate instead of the configured `target_dir`.
        #[arg(long)]
        target_dir: Option<PathBuf>,
        /// Print the JSON report instead of markdown.
        #[arg(long)]
        json: bool,
    },
    /// Show which plan step and spec references produced a file.
    Explain {
        path: String,
        #[arg(long)]
        json: bool,
    },
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value)
        .ok_or_else(|| format!("unknown backend '{value}' (echo, command, openai, anthropic)"))
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            if let ForgeError::PolicyViolation { report } = &err {
                print!("{}", report.render_markdown());
            }
            eprintln!("forge: {err:#}");
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> ForgeResult<i32> {
    let root = cli.root;
    match cli.command {
        Command::Init { force } => {
            let paths = init_forge(&root, &InitOptions { force })?;
            println!("init: {}", paths.forge_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Prelude => {
            let prelude = Workspace::open(&root)?.prelude()?;
            println!("spec_fingerprint={}", prelude.spec_fingerprint());
            println!("prelude_fingerprint={}", prelude.fingerprint());
            println!();
            print!("{}", prelude.text());
            Ok(exit_codes::OK)
        }
        Command::Plan { goal, backend, out } => {
            let ws = open_with_backend(&root, backend)?;
            let outcome = ws.plan(&goal, &ws.backend())?;
            if let Some(out) = out {
                fs::write(&out, to_pretty_json(&outcome.plan)?)
                    .with_context(|| format!("write {}", out.display()))?;
            }
            print!("{}", render_plan_markdown(&outcome.plan));
            println!("audit: {}", outcome.audit_id);
            Ok(exit_codes::OK)
        }
        Command::Apply {
            goal,
            plan,
            allow,
            backend,
        } => {
            let ws = open_with_backend(&root, backend)?;
            let plan = plan.map(|path| read_plan(&path)).transpose()?;
            let backend = ws.backend();
            let outcome = ws.apply(
                &ApplyRequest {
                    goal,
                    plan,
                    allowed: allow,
                },
                &backend,
            )?;
            for path in &outcome.committed {
                println!("committed: {path}");
            }
            for path in &outcome.unchanged {
                println!("unchanged: {path}");
            }
            println!(
                "apply: {} error(s), {} warning(s) audit={}",
                outcome.report.errors, outcome.report.warnings, outcome.audit_id
            );
            Ok(exit_codes::OK)
        }
        Command::Check { target_dir, json } => {
            let ws = Workspace::open(&root)?;
            let outcome = match target_dir {
                Some(dir) => ws.check_target(&root.join(dir))?,
                None => ws.check()?,
            };
            if json {
                print!("{}", outcome.report.to_json()?);
            } else {
                print!("{}", outcome.report.render_markdown());
            }
            if outcome.report.errors > 0 {
                Ok(exit_codes::BLOCKED)
            } else {
                Ok(exit_codes::OK)
            }
        }
        Command::Explain { path, json } => {
            let ws = Workspace::open(&root)?;
            let found = explain(&ws.audit_log(), &path, &ws.config().policy.student_dirs)?;
            match found {
                Some(explanation) if json => print!("{}", to_pretty_json(&explanation)?),
                Some(explanation) => print!("{}", explanation.render()),
                None => {
                    eprintln!("explain: no committed plan step recorded for {path}");
                    return Ok(exit_codes::INVALID);
                }
            }
            Ok(exit_codes::OK)
        }
    }
}

fn open_with_backend(root: &Path, kind: Option<BackendKind>) -> ForgeResult<Workspace> {
    let ws = Workspace::open(root)?;
    let Some(kind) = kind else {
        return Ok(ws);
    };
    let mut config: ForgeConfig = ws.config().clone();
    config.backend.kind = kind;
    config
        .validate()
        .map_err(|err| ForgeError::Config(format!("{err:#}")))?;
    let ws = Workspace::with_config(root, config);
    tracing::debug!(backend = ws.backend().name(), "backend overridden");
    Ok(ws)
}

fn read_plan(path: &Path) -> ForgeResult<Plan> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;
    Ok(plan)
}
