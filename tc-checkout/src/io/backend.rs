//! Version-control backend abstraction.
//!
//! The [`Backend`] trait decouples the reconciliation engine from the actual
//! version-control tool (currently `hg`). Adapters translate each call into
//! backend invocations and classify failures; they never retry and never
//! decide on destructive actions. Tests use scripted backends that model a
//! remote in memory without spawning processes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::RevisionSpec;
use crate::error::BackendResult;

/// Capability interface over a version-control tool.
///
/// Mutating operations: `clone_repo`, `pull`, `update`, `purge`.
/// Read-only probes: `is_repository`, `interrupted_operation`,
/// `default_path`, `is_clean`, `identify`, `remote_head`.
pub trait Backend {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Clone `url` into `dest` without checking out a working copy.
    fn clone_repo(&self, url: &str, dest: &Path) -> BackendResult<()>;

    /// Pull only what is needed to resolve `rev` from `url` into `repo`.
    fn pull(&self, repo: &Path, url: &str, rev: &RevisionSpec) -> BackendResult<()>;

    /// Check out `rev`, discarding working copy changes. Returns the new node.
    fn update(&self, repo: &Path, rev: &RevisionSpec) -> BackendResult<String>;

    /// Full node hash of the checked-out revision.
    fn identify(&self, repo: &Path) -> BackendResult<String>;

    /// Revert tracked changes and delete untracked and ignored files.
    fn purge(&self, repo: &Path) -> BackendResult<()>;

    /// True if `dir` holds repository metadata of this backend's format.
    fn is_repository(&self, dir: &Path) -> bool;

    /// Describes an unfinished transaction or update left in `repo` by a
    /// killed process, if there is one.
    fn interrupted_operation(&self, repo: &Path) -> Option<String>;

    /// Recorded origin of the repository, if any.
    fn default_path(&self, repo: &Path) -> BackendResult<Option<String>>;

    /// True if the working copy has no modified, added, removed, missing or
    /// unknown files.
    fn is_clean(&self, repo: &Path) -> BackendResult<bool>;

    /// Ask the remote which node `rev` currently resolves to.
    ///
    /// May return a short hash; callers compare by prefix.
    fn remote_head(&self, url: &str, rev: &RevisionSpec) -> BackendResult<String>;
}

/// Backend selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Mercurial,
}
