//! Read-only classification of the target directory.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::core::alias::same_repository;
use crate::core::types::{DirectoryState, DirtyReason, FetchPlan, Phase, RevisionSpec};
use crate::error::CheckoutError;
use crate::io::backend::Backend;

/// Classify `plan.directory` against the plan.
///
/// Never mutates the directory. Filesystem errors while listing the directory
/// are fatal; backend probe failures on an existing repository classify it as
/// [`DirtyReason::Unreadable`] so the engine can recreate it. So does a
/// transaction or update left unfinished by a killed run, even though
/// `status` and `paths` still succeed there. A failed remote head lookup
/// falls back to [`DirectoryState::CleanNeedsUpdate`].
#[instrument(skip_all, fields(directory = %plan.directory.display()))]
pub fn inspect<B: Backend>(plan: &FetchPlan, backend: &B) -> Result<DirectoryState, CheckoutError> {
    let dir = plan.directory.as_path();
    if is_absent(dir).map_err(|err| CheckoutError::io(Phase::Inspect, err))? {
        debug!("directory absent or empty");
        return Ok(DirectoryState::Absent);
    }

    if !backend.is_repository(dir) {
        debug!("directory is not a repository");
        return Ok(dirty(DirtyReason::NotARepository));
    }

    if let Some(detail) = backend.interrupted_operation(dir) {
        debug!(detail = %detail, "repository was left mid-operation");
        return Ok(dirty(DirtyReason::Unreadable { detail }));
    }

    let origin = match backend.default_path(dir) {
        Ok(origin) => origin,
        Err(err) => return Ok(dirty(unreadable(err.reason()))),
    };
    match &origin {
        Some(found) if same_repository(found, &plan.base_url) => {}
        _ => {
            debug!(found = ?origin, expected = %plan.base_url, "repository has a foreign origin");
            return Ok(dirty(DirtyReason::ForeignOrigin { found: origin }));
        }
    }

    match backend.is_clean(dir) {
        Ok(true) => {}
        Ok(false) => return Ok(dirty(DirtyReason::LocalModifications)),
        Err(err) => return Ok(dirty(unreadable(err.reason()))),
    }

    let current = match backend.identify(dir) {
        Ok(node) => node,
        Err(err) => return Ok(dirty(unreadable(err.reason()))),
    };

    if is_at_target(plan, backend, &current) {
        debug!(revision = %current, "working copy already at target");
        return Ok(DirectoryState::CleanAtTarget { revision: current });
    }
    debug!(revision = %current, target = %plan.target, "working copy needs update");
    Ok(DirectoryState::CleanNeedsUpdate { current })
}

/// True if `dir` does not exist or has no entries.
pub fn is_absent(dir: &Path) -> io::Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err),
    }
}

fn is_at_target<B: Backend>(plan: &FetchPlan, backend: &B, current: &str) -> bool {
    match &plan.target {
        RevisionSpec::Literal(_) => plan.target.matches_node(current),
        RevisionSpec::DefaultBranchHead => {
            match backend.remote_head(&plan.source_url, &plan.target) {
                Ok(remote) => !remote.is_empty() && current.starts_with(&remote),
                Err(err) => {
                    warn!(error = %err, "remote head lookup failed, assuming update needed");
                    false
                }
            }
        }
    }
}

fn dirty(reason: DirtyReason) -> DirectoryState {
    DirectoryState::DirtyForeign { reason }
}

fn unreadable(detail: &str) -> DirtyReason {
    DirtyReason::Unreadable {
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::resolve;
    use crate::core::types::CheckoutRequest;
    use crate::test_support::{FakeBackend, Workspace, node_hash};

    const REPO: &str = "https://hg.example/repoA";

    fn plan(dir: &Path, rev: Option<&str>) -> FetchPlan {
        resolve(&CheckoutRequest {
            directory: dir.to_path_buf(),
            base_url: Some(REPO.to_string()),
            head_rev: rev.map(str::to_string),
            ..CheckoutRequest::default()
        })
        .expect("resolve")
    }

    #[test]
    fn missing_and_empty_directories_are_absent() {
        let ws = Workspace::new().expect("workspace");
        let backend = FakeBackend::new();
        let dir = ws.checkout("work");
        assert_eq!(inspect(&plan(&dir, None), &backend).expect("inspect"), DirectoryState::Absent);

        fs::create_dir(&dir).expect("mkdir");
        assert_eq!(inspect(&plan(&dir, None), &backend).expect("inspect"), DirectoryState::Absent);
    }

    #[test]
    fn file_in_place_of_directory_is_an_error() {
        let ws = Workspace::new().expect("workspace");
        let dir = ws.checkout("work");
        fs::write(&dir, "not a directory").expect("write");
        let err = inspect(&plan(&dir, None), &FakeBackend::new()).expect_err("file");
        assert!(matches!(err, CheckoutError::Io { phase: Phase::Inspect, .. }));
    }

    #[test]
    fn literal_target_is_compared_locally() {
        let ws = Workspace::new().expect("workspace");
        let dir = ws.checkout("work");
        let backend = FakeBackend::new().with_remote(REPO, &["abc123"]);
        backend.create_local(&dir, REPO).expect("local");

        let state = inspect(&plan(&dir, Some("abc123")), &backend).expect("inspect");
        assert_eq!(
            state,
            DirectoryState::CleanAtTarget {
                revision: node_hash("abc123")
            }
        );
        assert_eq!(backend.network_calls(), 0);
    }

    #[test]
    fn named_target_always_needs_update() {
        let ws = Workspace::new().expect("workspace");
        let dir = ws.checkout("work");
        let backend = FakeBackend::new().with_remote(REPO, &["abc123"]);
        backend.create_local(&dir, REPO).expect("local");

        let state = inspect(&plan(&dir, Some("FIREFOX_RELEASE")), &backend).expect("inspect");
        assert_eq!(
            state,
            DirectoryState::CleanNeedsUpdate {
                current: node_hash("abc123")
            }
        );
    }

    #[test]
    fn default_head_is_checked_against_remote() {
        let ws = Workspace::new().expect("workspace");
        let dir = ws.checkout("work");
        let backend = FakeBackend::new().with_remote(REPO, &["a1"]);
        backend.create_local(&dir, REPO).expect("local");
        assert!(matches!(
            inspect(&plan(&dir, None), &backend).expect("inspect"),
            DirectoryState::CleanAtTarget { .. }
        ));

        backend.set_remote(REPO, &["a1", "b2"]);
        assert!(matches!(
            inspect(&plan(&dir, None), &backend).expect("inspect"),
            DirectoryState::CleanNeedsUpdate { .. }
        ));
    }

    #[test]
    fn dirty_reasons() {
        let ws = Workspace::new().expect("workspace");
        let backend = FakeBackend::new()
            .with_remote(REPO, &["a1"])
            .with_remote("https://hg.example/repoB", &["b1"]);

        let plain = ws.checkout("plain");
        fs::create_dir_all(&plain).expect("mkdir");
        fs::write(plain.join("file"), "x").expect("write");
        assert_eq!(
            inspect(&plan(&plain, None), &backend).expect("inspect"),
            DirectoryState::DirtyForeign {
                reason: DirtyReason::NotARepository
            }
        );

        let foreign = ws.checkout("foreign");
        backend
            .create_local(&foreign, "https://hg.example/repoB")
            .expect("local");
        assert_eq!(
            inspect(&plan(&foreign, None), &backend).expect("inspect"),
            DirectoryState::DirtyForeign {
                reason: DirtyReason::ForeignOrigin {
                    found: Some("https://hg.example/repoB".to_string())
                }
            }
        );

        let modified = ws.checkout("modified");
        backend.create_local(&modified, REPO).expect("local");
        backend.set_dirty(&modified);
        assert_eq!(
            inspect(&plan(&modified, None), &backend).expect("inspect"),
            DirectoryState::DirtyForeign {
                reason: DirtyReason::LocalModifications
            }
        );

        let interrupted = ws.checkout("interrupted");
        backend.create_local(&interrupted, REPO).expect("local");
        fs::create_dir_all(interrupted.join(".hg/store")).expect("mkdir");
        fs::write(interrupted.join(".hg/store/journal"), "").expect("journal");
        assert_eq!(
            inspect(&plan(&interrupted, None), &backend).expect("inspect"),
            DirectoryState::DirtyForeign {
                reason: DirtyReason::Unreadable {
                    detail: "abandoned transaction (.hg/store/journal)".to_string()
                }
            }
        );

        let corrupt = ws.checkout("corrupt");
        fs::create_dir_all(corrupt.join(".hg")).expect("mkdir");
        assert!(matches!(
            inspect(&plan(&corrupt, None), &backend).expect("inspect"),
            DirectoryState::DirtyForeign {
                reason: DirtyReason::Unreadable { .. }
            }
        ));
    }
}
