//! Shared deterministic types for checkout reconciliation.
//!
//! These types define the contracts between the resolver, the inspector, the
//! engine and the backend adapter. They carry no I/O and are rebuilt from
//! scratch on every invocation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Backend marker for "head of the default branch".
///
/// Mercurial resolves the branch name `default` to the tip-most head of that
/// branch, both for `pull -r` and `update -r`.
pub const DEFAULT_BRANCH_MARKER: &str = "default";

const FULL_HASH_LEN: usize = 40;
const SHORT_HASH_LEN: usize = 12;
const MIN_HASH_PREFIX: usize = 6;

/// Raw checkout request as received from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckoutRequest {
    /// Target directory; created if absent.
    pub directory: PathBuf,
    /// Repository the directory is cloned from.
    pub base_url: Option<String>,
    /// Repository to pull the head revision from. Defaults to `base_url`.
    pub head_url: Option<String>,
    /// Revision to check out. Defaults to the default-branch head.
    pub head_rev: Option<String>,
    /// Reference on head to fetch. Accepted but inert for mercurial.
    pub head_ref: Option<String>,
}

/// Revision the working copy must end up at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RevisionSpec {
    /// Head of the default branch, only known after contacting the remote.
    DefaultBranchHead,
    /// A revision string exactly as the caller gave it.
    Literal(String),
}

impl RevisionSpec {
    /// String handed to the backend. Never empty.
    pub fn as_backend_arg(&self) -> &str {
        match self {
            RevisionSpec::DefaultBranchHead => DEFAULT_BRANCH_MARKER,
            RevisionSpec::Literal(rev) => rev,
        }
    }

    /// True when the revision can be matched against a local node hash
    /// without asking the remote.
    ///
    /// Short all-decimal strings are excluded: mercurial reads them as local
    /// revision numbers, which differ between clones.
    pub fn is_local_hash(&self) -> bool {
        match self {
            RevisionSpec::DefaultBranchHead => false,
            RevisionSpec::Literal(rev) => {
                (MIN_HASH_PREFIX..=FULL_HASH_LEN).contains(&rev.len())
                    && rev.bytes().all(|b| b.is_ascii_hexdigit())
                    && (rev.len() >= SHORT_HASH_LEN || !rev.bytes().all(|b| b.is_ascii_digit()))
            }
        }
    }

    /// True when `node` (a full hash) is the revision named here.
    pub fn matches_node(&self, node: &str) -> bool {
        match self {
            RevisionSpec::Literal(rev) if self.is_local_hash() => {
                node.len() == FULL_HASH_LEN && node.starts_with(&rev.to_ascii_lowercase())
            }
            _ => false,
        }
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_backend_arg())
    }
}

/// Normalized, fully-resolved plan derived once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub directory: PathBuf,
    /// Clone origin; recorded as `paths.default` of the local repository.
    pub base_url: String,
    /// Pull source for the target revision.
    pub source_url: String,
    pub target: RevisionSpec,
    /// Recorded for reporting only.
    pub head_ref: Option<String>,
}

impl FetchPlan {
    /// True when the head lives in a different repository than the clone origin.
    pub fn pulls_from_head(&self) -> bool {
        self.source_url != self.base_url
    }
}

/// Why a non-empty directory cannot be reused as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyReason {
    /// Non-empty directory without repository metadata.
    NotARepository,
    /// Repository cloned from somewhere else.
    ForeignOrigin { found: Option<String> },
    /// Matching repository with uncommitted or unknown files.
    LocalModifications,
    /// Repository metadata exists but cannot be probed.
    Unreadable { detail: String },
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyReason::NotARepository => f.write_str("not a repository"),
            DirtyReason::ForeignOrigin { found: Some(found) } => {
                write!(f, "repository cloned from {found}")
            }
            DirtyReason::ForeignOrigin { found: None } => {
                f.write_str("repository without a default path")
            }
            DirtyReason::LocalModifications => f.write_str("working copy has local changes"),
            DirtyReason::Unreadable { detail } => write!(f, "unreadable repository: {detail}"),
        }
    }
}

/// Classification of the target directory at the start of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryState {
    Absent,
    CleanAtTarget { revision: String },
    CleanNeedsUpdate { current: String },
    DirtyForeign { reason: DirtyReason },
}

/// Action the engine took to reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Cloned,
    PulledAndUpdated,
    NoOp,
    Recreated,
}

/// Outcome of a successful reconciliation, used for reporting only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub final_revision: String,
    pub action: Action,
    /// Network attempts made against the backend (clone and pull).
    pub attempts: u32,
    pub seeded_from_cache: bool,
}

/// Phase of the checkout a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inspect,
    Clone,
    Pull,
    Update,
    Identify,
    Purge,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Inspect => "inspect",
            Phase::Clone => "clone",
            Phase::Pull => "pull",
            Phase::Update => "update",
            Phase::Identify => "identify",
            Phase::Purge => "purge",
        };
        f.write_str(name)
    }
}
