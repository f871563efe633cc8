//! I/O for checkout reconciliation: backend processes, directory probes,
//! configuration and the clone cache.

pub mod backend;
pub mod cache;
pub mod config;
pub mod hg;
pub mod inspect;
pub mod process;
