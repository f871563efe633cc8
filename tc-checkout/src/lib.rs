//! Mercurial checkout reconciliation for TaskCluster workers.
//!
//! Given a directory, a base repository, and optionally a head repository and
//! revision, brings the directory's working copy to exactly that revision with
//! as little network and disk work as the directory's current state allows.
//!
//! - **[`core`]**: Pure, deterministic logic (request resolution, failure
//!   classification, retry policy, URL aliases). No I/O.
//! - **[`io`]**: Side-effecting operations (`hg` processes, directory probes,
//!   config, clone cache). Isolated behind traits to enable fakes in tests.
//!
//! [`engine`] coordinates the two to run one checkout.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
