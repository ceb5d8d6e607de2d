//! Session state (`.forge/state/session.json`): the last known spec fingerprint.
//!
//! Loaded once at operation start, written once at the end. A single record,
//! last write wins.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::{to_pretty_json, write_atomic};
use crate::core::canonical::Fingerprint;
use crate::core::plan::Operation;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    /// Fingerprint of the spec the last plan or committed apply was built against.
    pub spec_fingerprint: Option<Fingerprint>,
    pub last_goal: Option<String>,
    pub last_backend: Option<String>,
    pub last_operation: Option<Operation>,
    /// RFC 3339 time of the last plan or apply that updated this record.
    pub updated_at: Option<String>,
    pub last_check_at: Option<String>,
}

/// Load session state, `None` if no operation has run yet.
pub fn load_session(path: &Path) -> Result<Option<SessionState>> {
    if !path.exists() {
        debug!(path = %path.display(), "no session state yet");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    let state: SessionState = serde_json::from_str(&contents)
        .with_context(|| format!("parse session {}", path.display()))?;
    debug!(
        fingerprint = ?state.spec_fingerprint.as_ref().map(Fingerprint::short),
        "session loaded"
    );
    Ok(Some(state))
}

/// Atomically replace session state on disk.
pub fn save_session(path: &Path, state: &SessionState) -> Result<()> {
    debug!(path = %path.display(), operation = ?state.last_operation, "writing session state");
    let buf = to_pretty_json(state)?;
    write_atomic(path, buf.as_bytes())
}
