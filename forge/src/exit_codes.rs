//! Stable exit codes for forge CLI commands.

use crate::error::ForgeError;

/// Command succeeded; `check` found no error-severity violation.
pub const OK: i32 = 0;
/// Invalid input, configuration or spec, or any other failure.
pub const INVALID: i32 = 1;
/// `apply` was blocked by policy, or `check` found error violations.
pub const BLOCKED: i32 = 2;
/// The spec changed since the plan being applied.
pub const DRIFT: i32 = 3;
/// Another forge operation holds the workshop lock.
pub const LOCKED: i32 = 4;
/// The generation backend failed or returned something unusable.
pub const BACKEND: i32 = 5;

pub fn for_error(err: &ForgeError) -> i32 {
    match err {
        ForgeError::PolicyViolation { .. } => BLOCKED,
        ForgeError::SpecDrift { .. } => DRIFT,
        ForgeError::ConcurrentOperation { .. } => LOCKED,
        ForgeError::Backend { .. } | ForgeError::PlanParse { .. } => BACKEND,
        _ => INVALID,
    }
}
