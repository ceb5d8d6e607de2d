//! Staging area and all-or-nothing commit into the target tree.
//!
//! Every step is written under `.forge/staging/<id>/files/` first. Commit then
//! moves staged files into the target in plan order, parking any file it
//! replaces under `backup/`. If any move fails, everything already moved is
//! put back before the error is returned.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::core::plan::{Plan, StepAction, check_step_path};
use crate::core::tree::TreeView;
use crate::error::{ForgeError, ForgeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChange {
    pub path: String,
    pub action: StepAction,
    staged: PathBuf,
    target: PathBuf,
    /// Target already holds exactly this content; commit skips it.
    pub unchanged: bool,
}

#[derive(Debug)]
pub struct Staging {
    dir: PathBuf,
    changes: Vec<StagedChange>,
    contents: TreeView,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub committed: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Stage every step of `plan` against `target` under `staging_root/<id>`.
#[instrument(skip_all, fields(id = %id, steps = plan.steps.len()))]
pub fn stage_plan(
    staging_root: &Path,
    id: &str,
    target: &Path,
    plan: &Plan,
) -> ForgeResult<Staging> {
    let dir = staging_root.join(id);
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("clear stale staging {}", dir.display()))?;
    }
    let files_dir = dir.join("files");
    fs::create_dir_all(&files_dir)
        .with_context(|| format!("create staging dir {}", files_dir.display()))?;

    let mut staging = Staging {
        dir,
        changes: Vec::with_capacity(plan.steps.len()),
        contents: TreeView::new(),
    };
    if let Err(err) = stage_steps(&mut staging, &files_dir, target, plan) {
        let _ = fs::remove_dir_all(&staging.dir);
        return Err(err);
    }
    Ok(staging)
}

fn stage_steps(
    staging: &mut Staging,
    files_dir: &Path,
    target: &Path,
    plan: &Plan,
) -> ForgeResult<()> {
    let mut seen = BTreeSet::new();
    for step in &plan.steps {
        check_step_path(&step.path).map_err(|reason| ForgeError::Staging {
            path: step.path.clone(),
            reason,
        })?;
        if !seen.insert(step.path.as_str()) {
            return Err(ForgeError::Staging {
                path: step.path.clone(),
                reason: "path appears in more than one step".to_string(),
            });
        }
        let target_path = target.join(&step.path);
        let unchanged =
            check_precondition(target, &step.path, &target_path, step.action, &step.content)?;

        let staged = files_dir.join(&step.path);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create staging dir {}", parent.display()))?;
        }
        fs::write(&staged, &step.content)
            .with_context(|| format!("stage {}", staged.display()))?;
        debug!(path = %step.path, action = %step.action, unchanged, "step staged");

        staging.contents.insert_file(step.path.clone(), step.content.clone());
        staging.changes.push(StagedChange {
            path: step.path.clone(),
            action: step.action,
            staged,
            target: target_path,
            unchanged,
        });
    }
    Ok(())
}

/// Returns whether the target already matches `content`.
fn check_precondition(
    target_root: &Path,
    rel: &str,
    target_path: &Path,
    action: StepAction,
    content: &str,
) -> ForgeResult<bool> {
    let fail = |reason: &str| ForgeError::Staging {
        path: rel.to_string(),
        reason: reason.to_string(),
    };
    let mut ancestor = target_path.parent();
    while let Some(dir) = ancestor {
        if dir == target_root {
            break;
        }
        if dir.is_file() {
            return Err(fail("a parent path is an existing file"));
        }
        ancestor = dir.parent();
    }
    if target_path.is_dir() {
        return Err(fail("target is an existing directory"));
    }
    let existing = if target_path.is_file() {
        Some(
            fs::read(target_path)
                .with_context(|| format!("read {}", target_path.display()))?,
        )
    } else {
        None
    };
    match (action, existing) {
        (_, Some(bytes)) if bytes == content.as_bytes() => Ok(true),
        (StepAction::Create, Some(_)) => {
            Err(fail("create target already exists with different content"))
        }
        (StepAction::Create, None) => Ok(false),
        (StepAction::Update, Some(_)) => Ok(false),
        (StepAction::Update, None) => Err(fail("update target does not exist")),
    }
}

impl Staging {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn changes(&self) -> &[StagedChange] {
        &self.changes
    }

    /// Staged file contents, for overlaying on the scanned target.
    pub fn contents(&self) -> &TreeView {
        &self.contents
    }

    /// Move staged files into the target in order, restoring on failure.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn commit(&self) -> ForgeResult<CommitSummary> {
        let backup_root = self.dir.join("backup");
        let mut done: Vec<Applied> = Vec::new();
        let mut summary = CommitSummary::default();

        for change in &self.changes {
            if change.unchanged {
                summary.unchanged.push(change.path.clone());
                continue;
            }
            match apply_one(change, &backup_root) {
                Ok(applied) => {
                    summary.committed.push(change.path.clone());
                    done.push(applied);
                }
                Err(err) => {
                    warn!(
                        path = %change.path,
                        err = %format!("{err:#}"),
                        "commit failed, restoring"
                    );
                    rollback(done);
                    return Err(ForgeError::Commit {
                        path: change.path.clone(),
                        reason: format!("{err:#}"),
                    });
                }
            }
        }
        info!(
            committed = summary.committed.len(),
            unchanged = summary.unchanged.len(),
            "staged changes committed"
        );
        Ok(summary)
    }

    /// Delete the staging directory.
    pub fn cleanup(self) {
        if let Err(err) = fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), %err, "failed to remove staging dir");
        }
    }
}

struct Applied {
    target: PathBuf,
    backup: Option<PathBuf>,
    created_dirs: Vec<PathBuf>,
}

fn apply_one(change: &StagedChange, backup_root: &Path) -> anyhow::Result<Applied> {
    let mut created_dirs = Vec::new();
    if let Some(parent) = change.target.parent() {
        let mut missing = Vec::new();
        let mut cursor = Some(parent);
        while let Some(dir) = cursor {
            if dir.exists() {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        missing.reverse();
        created_dirs = missing;
    }

    let backup = if change.target.exists() {
        let backup = backup_root.join(&change.path);
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        move_file(&change.target, &backup)?;
        Some(backup)
    } else {
        None
    };

    if let Err(err) = move_file(&change.staged, &change.target) {
        if let Some(backup) = &backup
            && let Err(restore) = move_file(backup, &change.target)
        {
            warn!(
                path = %change.target.display(),
                err = %format!("{restore:#}"),
                "could not restore backup"
            );
        }
        remove_created_dirs(&created_dirs);
        return Err(err);
    }
    Ok(Applied {
        target: change.target.clone(),
        backup,
        created_dirs,
    })
}

fn rollback(done: Vec<Applied>) {
    for applied in done.into_iter().rev() {
        let restored = match &applied.backup {
            Some(backup) => move_file(backup, &applied.target),
            None => fs::remove_file(&applied.target)
                .with_context(|| format!("remove {}", applied.target.display())),
        };
        if let Err(err) = restored {
            warn!(
                path = %applied.target.display(),
                err = %format!("{err:#}"),
                "rollback step failed"
            );
        }
        remove_created_dirs(&applied.created_dirs);
    }
}

fn remove_created_dirs(dirs: &[PathBuf]) {
    // Deepest first; `remove_dir` refuses non-empty dirs.
    for dir in dirs.iter().rev() {
        let _ = fs::remove_dir(dir);
    }
}

/// Rename, falling back to copy + rename when crossing filesystems.
fn move_file(from: &Path, to: &Path) -> anyhow::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let mut tmp_name = to
        .file_name()
        .with_context(|| format!("no file name in {}", to.display()))?
        .to_os_string();
    tmp_name.push(".forge-tmp");
    let tmp = to.with_file_name(tmp_name);
    fs::copy(from, &tmp).with_context(|| format!("copy {} to {}", from.display(), tmp.display()))?;
    fs::rename(&tmp, to).with_context(|| format!("move into {}", to.display()))?;
    fs::remove_file(from).with_context(|| format!("remove {}", from.display()))?;
    Ok(())
}
