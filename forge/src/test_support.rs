//! Test-only helpers: a sample workshop on disk and a scripted backend.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::backend::retry::RetryPolicy;
use crate::backend::{BackendError, CompletionRequest, GenerationBackend, RawResponse};
use crate::io::config::ForgeConfig;
use crate::orchestrator::Workspace;

pub const SAMPLE_WORKSHOP: &str = "\
id: rust-101
title: Rust 101
version: '1.0'
audience: backend engineers
duration:
  groups: 1
  sessions_per_group: 2
  session_minutes: 90
policy:
  student_ai_usage: restricted
  license: MIT
";

pub const SAMPLE_GUIDELINES: &str = "Keep labs short and runnable.\n";

pub const SAMPLE_README: &str = "# Rust 101\n\nGenerated from the workshop spec in `spec/`.\n";

/// `spec/modules.yml` with one `intro` module of the given duration.
pub fn sample_modules(duration_minutes: i64) -> String {
    format!(
        "modules:\n  - id: intro\n    title: Introduction\n    objective: X\n    duration_minutes: {duration_minutes}\n    deliverables:\n      - labs/intro/README.md\n"
    )
}

/// Write a workshop at `root` that passes every rule except deliverable existence.
pub fn write_sample_workshop(root: &Path) -> Result<()> {
    let spec = root.join("spec");
    fs::create_dir_all(&spec).with_context(|| format!("create {}", spec.display()))?;
    fs::write(spec.join("workshop.yml"), SAMPLE_WORKSHOP).context("write workshop.yml")?;
    write_modules(root, 60)?;
    fs::write(spec.join("ai_guidelines.md"), SAMPLE_GUIDELINES).context("write guidelines")?;
    fs::write(root.join("README.md"), SAMPLE_README).context("write README.md")?;
    for dir in ["instructor", "reference"] {
        fs::create_dir_all(root.join(dir)).with_context(|| format!("create {dir}"))?;
    }
    Ok(())
}

/// Rewrite `spec/modules.yml`, e.g. to change the spec between plan and apply.
pub fn write_modules(root: &Path, duration_minutes: i64) -> Result<()> {
    let path = root.join("spec").join("modules.yml");
    fs::write(&path, sample_modules(duration_minutes))
        .with_context(|| format!("write {}", path.display()))
}

/// Sample workshop in a temporary directory, removed on drop.
pub struct TestWorkshop {
    dir: TempDir,
}

impl TestWorkshop {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        write_sample_workshop(dir.path())?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Default config with 1 ms retry backoff.
    pub fn workspace(&self) -> Workspace {
        let config = ForgeConfig {
            retry: RetryPolicy {
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
                ..RetryPolicy::default()
            },
            ..ForgeConfig::default()
        };
        Workspace::with_config(self.path(), config)
    }
}

/// Backend that replays queued responses in order and counts calls.
#[derive(Debug)]
pub struct ScriptedBackend {
    responses: RefCell<VecDeque<Result<String, BackendError>>>,
    calls: Cell<u32>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<String, BackendError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn performs_external_calls(&self) -> bool {
        false
    }

    fn complete(&self, _request: &CompletionRequest<'_>) -> Result<RawResponse, BackendError> {
        self.calls.set(self.calls.get() + 1);
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(RawResponse::new(text)),
            Some(Err(err)) => Err(err),
            None => Err(BackendError::Unsupported("script exhausted".to_string())),
        }
    }
}
