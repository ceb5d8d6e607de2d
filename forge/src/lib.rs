//! Spec-driven, policy-gated generation of workshop materials.
//!
//! A workshop's specification tree is canonicalized and fingerprinted, turned
//! into a deterministic prelude, and handed to a generation backend that
//! proposes a plan. Plans are staged, checked by the policy engine, and only
//! then committed. Session state and an append-only audit trail tie every
//! change back to the spec it came from.
//!
//! - **[`core`]**: pure logic (canonicalization, prelude, plans, policy).
//! - **[`io`]**: filesystem, locking, processes and persistence.
//! - **[`backend`]**: the generation backend capability and its variants.
//!
//! [`orchestrator`] and [`explain`] combine them into the CLI operations.

pub mod backend;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod explain;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
