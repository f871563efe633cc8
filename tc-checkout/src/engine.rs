//! Orchestration for a single checkout reconciliation.
//!
//! The engine classifies the target directory once, then drives the backend
//! through the one transition that state calls for. It alone decides when a
//! directory may be purged or recreated and how often a network phase is
//! retried.

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::core::alias::same_repository;
use crate::core::resolver::{anchor_local_paths, resolve};
use crate::core::retry::RetryPolicy;
use crate::core::types::{
    Action, CheckoutRequest, DirectoryState, DirtyReason, FetchPlan, Phase, ReconciliationResult,
    RevisionSpec,
};
use crate::error::{BackendError, BackendResult, CheckoutError};
use crate::io::backend::Backend;
use crate::io::cache::{CloneSeeder, NoCache};
use crate::io::inspect::inspect;

/// Drives a directory to the requested revision through a [`Backend`].
#[derive(Debug, Clone)]
pub struct Reconciler<B, S = NoCache> {
    backend: B,
    seeder: S,
    policy: RetryPolicy,
}

/// Per-invocation bookkeeping. Never persisted.
#[derive(Debug, Default)]
struct Progress {
    attempts: u32,
    seeded_from_cache: bool,
}

impl<B: Backend> Reconciler<B, NoCache> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self::with_seeder(backend, NoCache, policy)
    }
}

impl<B: Backend, S: CloneSeeder> Reconciler<B, S> {
    pub fn with_seeder(backend: B, seeder: S, policy: RetryPolicy) -> Self {
        Self {
            backend,
            seeder,
            policy,
        }
    }

    /// Resolve `request` and reconcile its directory.
    ///
    /// Invalid requests fail before anything on disk is touched. Relative
    /// local-path URLs are anchored at the current directory.
    pub fn reconcile(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ReconciliationResult, CheckoutError> {
        let plan = resolve(request)?;
        let cwd = env::current_dir().map_err(|err| CheckoutError::io(Phase::Inspect, err))?;
        self.reconcile_plan(&anchor_local_paths(plan, &cwd))
    }

    /// Bring `plan.directory` to `plan.target`.
    #[instrument(
        skip_all,
        fields(
            backend = self.backend.name(),
            directory = %plan.directory.display(),
            target = %plan.target,
        )
    )]
    pub fn reconcile_plan(&self, plan: &FetchPlan) -> Result<ReconciliationResult, CheckoutError> {
        let state = inspect(plan, &self.backend)?;
        debug!(state = ?state, "directory classified");

        let mut progress = Progress::default();
        let (action, final_revision) = match state {
            DirectoryState::CleanAtTarget { revision } => (Action::NoOp, revision),
            DirectoryState::CleanNeedsUpdate { current } => {
                info!(current = %current, "updating existing checkout");
                match self.pull_and_update(plan, &mut progress) {
                    Ok(revision) => (Action::PulledAndUpdated, revision),
                    Err(err) => {
                        let revision = self.recover_interrupted(err, plan, &mut progress)?;
                        (Action::Recreated, revision)
                    }
                }
            }
            DirectoryState::Absent => {
                info!(url = %plan.base_url, "creating checkout");
                let revision = self.fresh_checkout(plan, &mut progress)?;
                (Action::Cloned, revision)
            }
            DirectoryState::DirtyForeign {
                reason: DirtyReason::LocalModifications,
            } => {
                warn!("discarding local changes");
                let revision = self
                    .purge_and_update(plan, &mut progress)
                    .or_else(|err| self.recover_interrupted(err, plan, &mut progress))?;
                (Action::Recreated, revision)
            }
            DirectoryState::DirtyForeign { reason } => {
                warn!(reason = %reason, "removing directory contents before clone");
                let revision = self.recreate(plan, &mut progress)?;
                (Action::Recreated, revision)
            }
        };

        info!(
            action = ?action,
            revision = %final_revision,
            attempts = progress.attempts,
            "checkout complete"
        );
        Ok(ReconciliationResult {
            final_revision,
            action,
            attempts: progress.attempts,
            seeded_from_cache: progress.seeded_from_cache,
        })
    }

    /// Empty the directory, keeping the directory itself, and check out afresh.
    fn recreate(&self, plan: &FetchPlan, progress: &mut Progress) -> Result<String, CheckoutError> {
        clear_directory(&plan.directory).map_err(|err| CheckoutError::io(Phase::Purge, err))?;
        self.fresh_checkout(plan, progress)
    }

    /// Recreate a repository that a backend reported as mid-transaction.
    /// Any other failure is returned unchanged.
    fn recover_interrupted(
        &self,
        err: CheckoutError,
        plan: &FetchPlan,
        progress: &mut Progress,
    ) -> Result<String, CheckoutError> {
        match err {
            CheckoutError::Interrupted { phase, reason } => {
                warn!(
                    %phase,
                    reason = %reason,
                    "repository has an interrupted transaction, recreating"
                );
                self.recreate(plan, progress)
            }
            err => Err(err),
        }
    }

    /// Populate an absent or emptied directory and check out the target.
    fn fresh_checkout(
        &self,
        plan: &FetchPlan,
        progress: &mut Progress,
    ) -> Result<String, CheckoutError> {
        let dir = plan.directory.as_path();
        if let Some(parent) = dir.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| CheckoutError::io(Phase::Clone, err))?;
        }

        progress.seeded_from_cache = self.seed_from_cache(plan)?;
        if !progress.seeded_from_cache {
            self.with_retry(Phase::Clone, progress, || {
                clear_directory(dir).map_err(|err| {
                    BackendError::fatal(
                        Phase::Clone,
                        format!("remove partial clone {}: {err}", dir.display()),
                    )
                })?;
                self.backend.clone_repo(&plan.base_url, dir)
            })?;
        }

        // A cached tarball may be stale; a clone of the base lacks head-only revisions.
        let target = if progress.seeded_from_cache || plan.pulls_from_head() {
            self.pull(plan, progress)?
        } else {
            plan.target.clone()
        };
        self.update(plan, &target)
    }

    /// Seed from the clone cache. Returns false when the caller must clone.
    ///
    /// Seeding problems are never fatal: the directory is emptied again and the
    /// checkout proceeds with a plain clone.
    fn seed_from_cache(&self, plan: &FetchPlan) -> Result<bool, CheckoutError> {
        let dir = plan.directory.as_path();
        match self.seeder.seed(&plan.base_url, dir) {
            Ok(false) => return Ok(false),
            Ok(true) => {}
            Err(err) => {
                warn!(error = %format!("{err:#}"), "clone cache unusable, cloning instead");
                clear_directory(dir).map_err(|err| CheckoutError::io(Phase::Clone, err))?;
                return Ok(false);
            }
        }

        let origin = if self.backend.is_repository(dir) {
            self.backend.default_path(dir).ok().flatten()
        } else {
            None
        };
        match origin {
            Some(found) if same_repository(&found, &plan.base_url) => {
                info!("seeded checkout from clone cache");
                Ok(true)
            }
            found => {
                warn!(
                    found = ?found,
                    expected = %plan.base_url,
                    "cached clone has a foreign origin, discarding"
                );
                clear_directory(dir).map_err(|err| CheckoutError::io(Phase::Clone, err))?;
                Ok(false)
            }
        }
    }

    fn purge_and_update(
        &self,
        plan: &FetchPlan,
        progress: &mut Progress,
    ) -> Result<String, CheckoutError> {
        self.backend.purge(&plan.directory)?;
        self.pull_and_update(plan, progress)
    }

    fn pull_and_update(
        &self,
        plan: &FetchPlan,
        progress: &mut Progress,
    ) -> Result<String, CheckoutError> {
        let target = self.pull(plan, progress)?;
        self.update(plan, &target)
    }

    /// Pull the target and return the revision to check out.
    ///
    /// The default branch of a separate head repository is first pinned to
    /// the node that repository reports. Updating to `default` would pick the
    /// tip-most default head among everything pulled, which may come from the
    /// base repository.
    fn pull(
        &self,
        plan: &FetchPlan,
        progress: &mut Progress,
    ) -> Result<RevisionSpec, CheckoutError> {
        let target = if plan.pulls_from_head() && plan.target == RevisionSpec::DefaultBranchHead {
            let node = self.with_retry(Phase::Pull, progress, || {
                self.backend.remote_head(&plan.source_url, &plan.target)
            })?;
            debug!(node = %node, url = %plan.source_url, "pinned head repository default branch");
            RevisionSpec::Literal(node)
        } else {
            plan.target.clone()
        };
        self.with_retry(Phase::Pull, progress, || {
            self.backend.pull(&plan.directory, &plan.source_url, &target)
        })?;
        Ok(target)
    }

    /// Check out `target`. Never retried: after a successful fetch an
    /// unknown revision means the plan itself is wrong.
    fn update(&self, plan: &FetchPlan, target: &RevisionSpec) -> Result<String, CheckoutError> {
        let revision = self.backend.update(&plan.directory, target)?;
        if target.is_local_hash() && !target.matches_node(&revision) {
            return Err(CheckoutError::Fatal {
                phase: Phase::Update,
                reason: format!("checked out {revision}, expected {target}"),
            });
        }
        Ok(revision)
    }

    /// Run a network phase, retrying transient failures within the policy.
    fn with_retry<T>(
        &self,
        phase: Phase,
        progress: &mut Progress,
        mut op: impl FnMut() -> BackendResult<T>,
    ) -> Result<T, CheckoutError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            progress.attempts += 1;
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err.into()),
                Err(err) => err,
            };

            if !self.policy.allows_retry_after(attempt) {
                warn!(
                    %phase,
                    attempt,
                    reason = %err.reason(),
                    "giving up after transient failures"
                );
                return Err(CheckoutError::RetriesExhausted {
                    phase,
                    attempts: attempt,
                    reason: err.reason().to_string(),
                });
            }
            let delay = self.policy.backoff_after(attempt);
            warn!(
                %phase,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %err.reason(),
                "transient failure, retrying"
            );
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
}

/// Remove everything inside `dir`, keeping `dir` itself.
///
/// The directory may be a mount point, so only its entries are deleted.
/// Symlinks are removed, never followed. A missing directory is fine.
fn clear_directory(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
