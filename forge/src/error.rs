//! Error taxonomy surfaced by forge operations.
//!
//! Backend failures, drift, policy blocks and lock contention are expected
//! outcomes that callers branch on, so they are typed variants rather than
//! opaque `anyhow` chains. Plumbing failures (filesystem, serialization) stay
//! `anyhow` and are carried in [`ForgeError::Io`].

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::core::policy::ComplianceReport;

pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    /// The specification tree contains a value the canonicalizer cannot normalize.
    #[error("malformed specification at {location}: {reason}")]
    MalformedSpec { location: String, reason: String },

    /// The specification changed since the fingerprint the operation was planned against.
    #[error(
        "specification drift: recorded fingerprint {recorded} but current is {current} (re-run plan)"
    )]
    SpecDrift { recorded: String, current: String },

    /// The generation backend failed after retries (if any were allowed).
    #[error("backend failed after {attempts} attempt(s): {source}")]
    Backend {
        #[source]
        source: BackendError,
        attempts: u32,
    },

    /// The backend responded but the response is not a valid plan.
    #[error("could not parse plan from backend response: {reason}")]
    PlanParse { reason: String, raw_response: String },

    /// Staged changes produced unallowed error-severity violations.
    #[error("blocked by {} policy error(s)", .report.errors)]
    PolicyViolation { report: Box<ComplianceReport> },

    /// Another operation holds the workshop lock.
    #[error(
        "another forge operation holds {} ({})",
        .lock_path.display(),
        .holder.as_deref().unwrap_or("unknown holder")
    )]
    ConcurrentOperation {
        lock_path: PathBuf,
        holder: Option<String>,
    },

    /// A plan step could not be staged against the current target tree.
    #[error("cannot stage {path}: {reason}")]
    Staging { path: String, reason: String },

    /// Moving a staged file into the target failed; committed files were restored.
    #[error("commit of {path} failed: {reason}")]
    Commit { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl ForgeError {
    /// Short stable label used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            ForgeError::MalformedSpec { .. } => "malformed_spec",
            ForgeError::SpecDrift { .. } => "spec_drift",
            ForgeError::Backend { source, .. } => source.kind(),
            ForgeError::PlanParse { .. } => "plan_parse",
            ForgeError::PolicyViolation { .. } => "policy_violation",
            ForgeError::ConcurrentOperation { .. } => "concurrent_operation",
            ForgeError::Staging { .. } => "staging",
            ForgeError::Commit { .. } => "commit",
            ForgeError::Config(_) => "config",
            ForgeError::Io(_) => "io",
        }
    }

    pub(crate) fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        ForgeError::MalformedSpec {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
