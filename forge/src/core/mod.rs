//! Deterministic, pure logic shared by forge operations.
//!
//! Nothing under `core` touches the filesystem, the clock or a backend. Inputs
//! are in-memory values and outputs are reproducible across machines.

pub mod canonical;
pub mod plan;
pub mod policy;
pub mod prelude;
pub mod tree;
pub mod workshop;
