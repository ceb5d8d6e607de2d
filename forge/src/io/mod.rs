//! Side-effecting helpers: filesystem layout, persistence, locking, processes.

pub mod atomic;
pub mod audit;
pub mod config;
pub mod init;
pub mod lock;
pub mod process;
pub mod session;
pub mod spec_source;
pub mod staging;
pub mod tree_scan;
