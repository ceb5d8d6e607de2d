//! Workshop-scoped advisory lock (`.forge/forge.lock`).
//!
//! The OS lock is what excludes other processes; the JSON written into the
//! file only helps a contending operation say who holds it. The lock is
//! released when [`ForgeLock`] drops, including on crash.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::plan::Operation;
use crate::error::{ForgeError, ForgeResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub operation: Operation,
    pub started_at: String,
}

impl LockHolder {
    fn current(operation: Operation) -> Self {
        Self {
            pid: std::process::id(),
            operation,
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    fn summary(&self) -> String {
        format!(
            "pid {} running {} since {}",
            self.pid, self.operation, self.started_at
        )
    }
}

#[derive(Debug)]
pub struct ForgeLock {
    file: File,
    path: PathBuf,
}

impl ForgeLock {
    /// Take the lock or fail immediately with `ConcurrentOperation`.
    pub fn acquire(path: &Path, operation: Operation) -> ForgeResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        if let Err(err) = file.try_lock_exclusive() {
            debug!(path = %path.display(), %err, "lock is held elsewhere");
            return Err(ForgeError::ConcurrentOperation {
                lock_path: path.to_path_buf(),
                holder: read_holder(path).map(|h| h.summary()),
            });
        }

        let holder = LockHolder::current(operation);
        let body = serde_json::to_string(&holder).context("serialize lock holder")?;
        write_holder(&mut file, body.as_bytes())
            .with_context(|| format!("write lock holder {}", path.display()))?;
        debug!(path = %path.display(), pid = holder.pid, "lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ForgeLock {
    fn drop(&mut self) {
        let cleared = self.file.set_len(0);
        if let Err(err) = cleared.and_then(|()| FileExt::unlock(&self.file)) {
            warn!(path = %self.path.display(), %err, "failed to release lock cleanly");
        }
    }
}

fn write_holder(file: &mut File, body: &[u8]) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(body)?;
    file.flush()
}

fn read_holder(path: &Path) -> Option<LockHolder> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_with_holder_details() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".forge").join("forge.lock");
        let held = ForgeLock::acquire(&path, Operation::Apply).expect("first");

        let err = ForgeLock::acquire(&path, Operation::Plan).unwrap_err();
        match err {
            ForgeError::ConcurrentOperation { lock_path, holder } => {
                assert_eq!(lock_path, path);
                let holder = holder.expect("holder");
                assert!(holder.contains(&format!("pid {}", std::process::id())));
                assert!(holder.contains("running apply"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(held.path(), path);
    }

    #[test]
    fn lock_is_released_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("forge.lock");
        drop(ForgeLock::acquire(&path, Operation::Check).expect("first"));
        ForgeLock::acquire(&path, Operation::Check).expect("second");
    }
}
