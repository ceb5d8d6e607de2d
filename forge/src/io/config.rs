//! Forge configuration stored under `.forge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;
use crate::backend::retry::RetryPolicy;
use crate::backend::{Backend, BackendKind, CommandBackend, EchoBackend, StubBackend};
use crate::core::policy::PolicySettings;

/// Forge configuration (TOML).
///
/// Meant to be edited by hand. Missing fields fall back to defaults, so an
/// empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Directory generated files land in, relative to the workshop root.
    pub target_dir: PathBuf,
    pub backend: BackendConfig,
    pub retry: RetryPolicy,
    pub policy: PolicySettings,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("."),
            backend: BackendConfig::default(),
            retry: RetryPolicy::default(),
            policy: PolicySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Program and arguments for the `command` backend (e.g. `["llm", "-m", "gpt-4o"]`).
    pub command: Vec<String>,
    /// Environment variable that must hold a credential before calling out.
    pub credential_env: Option<String>,
    pub timeout_secs: u64,
    /// Cap on captured backend stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Echo,
            command: Vec::new(),
            credential_env: None,
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Instantiate the configured backend variant.
    pub fn build(&self, workdir: &Path) -> Backend {
        match self.kind {
            BackendKind::Echo => Backend::Echo(EchoBackend::new()),
            BackendKind::Command => Backend::Command(
                CommandBackend::new(
                    self.command.clone(),
                    self.credential_env.clone(),
                    self.output_limit_bytes,
                )
                .with_workdir(workdir),
            ),
            kind @ (BackendKind::Openai | BackendKind::Anthropic) => {
                Backend::Stub(StubBackend::new(kind))
            }
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_dir.as_os_str().is_empty() {
            return Err(anyhow!("target_dir must not be empty"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        if self.backend.kind == BackendKind::Command
            && self.backend.command.first().is_none_or(|p| p.trim().is_empty())
        {
            return Err(anyhow!(
                "backend.command must be a non-empty array when backend.kind = \"command\""
            ));
        }
        self.retry.validate().map_err(|msg| anyhow!(msg))?;
        self.policy.validate()?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
