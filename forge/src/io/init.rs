//! Canonical `.forge/` layout and `forge init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{ForgeConfig, write_config};

/// All canonical paths within a workshop directory.
#[derive(Debug, Clone)]
pub struct ForgePaths {
    pub root: PathBuf,
    pub spec_dir: PathBuf,
    pub forge_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub session_path: PathBuf,
    pub audit_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub lock_path: PathBuf,
}

impl ForgePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let forge_dir = root.join(".forge");
        let state_dir = forge_dir.join("state");
        Self {
            spec_dir: root.join("spec"),
            gitignore_path: forge_dir.join(".gitignore"),
            config_path: forge_dir.join("config.toml"),
            session_path: state_dir.join("session.json"),
            audit_dir: forge_dir.join("audit"),
            staging_dir: forge_dir.join("staging"),
            reports_dir: forge_dir.join("reports"),
            lock_path: forge_dir.join("forge.lock"),
            state_dir,
            forge_dir,
            root,
        }
    }

    /// Resolve the configured target directory against the workshop root.
    pub fn target_dir(&self, config: &ForgeConfig) -> PathBuf {
        if config.target_dir.is_absolute() {
            config.target_dir.clone()
        } else {
            self.root.join(&config.target_dir)
        }
    }

    pub fn compliance_json_path(&self) -> PathBuf {
        self.reports_dir.join("compliance.json")
    }

    pub fn compliance_md_path(&self) -> PathBuf {
        self.reports_dir.join("compliance.md")
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Rewrite `config.toml` even if `.forge/` already exists.
    pub force: bool,
}

/// Create `.forge/` in `root` with a default config.
///
/// Audit records and session state are never touched, even with `force`.
pub fn init_forge(root: &Path, options: &InitOptions) -> Result<ForgePaths> {
    let paths = ForgePaths::new(root);
    if paths.forge_dir.exists() && !paths.forge_dir.is_dir() {
        return Err(anyhow!("forge init: .forge exists but is not a directory"));
    }
    if paths.forge_dir.exists() && !options.force {
        return Err(anyhow!(
            "forge init: .forge already exists (use --force to rewrite config)"
        ));
    }

    for dir in [
        &paths.forge_dir,
        &paths.state_dir,
        &paths.audit_dir,
        &paths.staging_dir,
        &paths.reports_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    fs::write(&paths.gitignore_path, FORGE_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &ForgeConfig::default())?;
    Ok(paths)
}

const FORGE_GITIGNORE: &str = "staging/\nforge.lock\n";
