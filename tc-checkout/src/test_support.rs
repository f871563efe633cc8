//! Test-only helpers: an in-memory backend that models remotes and local
//! repositories without spawning `hg`.
//!
//! Repository metadata lives in memory, keyed by directory. The on-disk side
//! is limited to the `.hg` marker directory so that directory inspection sees
//! the same layout it would with a real backend.
//!
//! Like `hg`, the fake records relative local clone sources as absolute paths
//! and updates `default` to the tip-most node of the local repository.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;

use crate::core::alias::absolutize_local;
use crate::core::types::{Phase, RevisionSpec};
use crate::error::{BackendError, BackendResult};
use crate::io::backend::Backend;
use crate::io::cache::CloneSeeder;
use crate::io::hg::interrupted_operation;

/// Temporary directory holding checkouts for one test.
pub struct Workspace {
    temp: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Path of checkout `name` inside the workspace. Not created.
    pub fn checkout(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }
}

/// Full 40-character node for a short label, e.g. `node_hash("abc123")`.
///
/// The label must be lowercase hex so prefix lookups behave like real nodes.
pub fn node_hash(label: &str) -> String {
    format!("{label:0<40}")
}

/// Backend call recorded by [`FakeBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Clone { url: String },
    Pull { url: String, rev: String },
    RemoteHead { url: String },
    Update { rev: String },
    Purge,
}

impl Call {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Call::Clone { .. } | Call::Pull { .. } | Call::RemoteHead { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct FakeRemote {
    /// Nodes in commit order; the last one is the default-branch head.
    nodes: Vec<String>,
}

impl FakeRemote {
    fn resolve(&self, rev: &RevisionSpec) -> Option<String> {
        match rev {
            RevisionSpec::DefaultBranchHead => self.nodes.last().cloned(),
            RevisionSpec::Literal(rev) => find_node(&self.nodes, rev),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FakeRepo {
    origin: Option<String>,
    /// Nodes in the order they were added; the last one is the tip.
    nodes: Vec<String>,
    current: Option<String>,
    dirty: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    remotes: HashMap<String, FakeRemote>,
    repos: BTreeMap<PathBuf, FakeRepo>,
    calls: Vec<Call>,
    next_failures: HashMap<Phase, VecDeque<BackendError>>,
    persistent_failures: HashMap<Phase, BackendError>,
}

impl FakeState {
    /// Scripted failure for the next call in `phase`, if any.
    fn take_failure(&mut self, phase: Phase) -> Option<BackendError> {
        if let Some(queue) = self.next_failures.get_mut(&phase)
            && let Some(err) = queue.pop_front()
        {
            return Some(err);
        }
        self.persistent_failures.get(&phase).cloned()
    }

    fn remote(&self, phase: Phase, url: &str) -> BackendResult<&FakeRemote> {
        self.remotes.get(&anchored(url)).ok_or_else(|| {
            BackendError::fatal(phase, format!("abort: repository {url} not found"))
        })
    }

    fn repo_mut(&mut self, phase: Phase, dir: &Path) -> BackendResult<&mut FakeRepo> {
        self.repos.get_mut(dir).ok_or_else(|| {
            BackendError::fatal(
                phase,
                format!("abort: repository {} not found", dir.display()),
            )
        })
    }
}

/// Scripted [`Backend`] with shared state.
///
/// Clones share the same state, so a test can keep a handle for assertions
/// after moving one into a `Reconciler`.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Rc<RefCell<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a remote at `url` whose history is `labels` (see [`node_hash`]).
    pub fn with_remote(self, url: &str, labels: &[&str]) -> Self {
        self.set_remote(url, labels);
        self
    }

    /// Replace the history of the remote at `url`.
    pub fn set_remote(&self, url: &str, labels: &[&str]) {
        let nodes = labels.iter().map(|label| node_hash(label)).collect();
        self.state
            .borrow_mut()
            .remotes
            .insert(url.to_string(), FakeRemote { nodes });
    }

    /// Create a local repository in `dir` cloned from `origin` and checked out
    /// at the remote's default head.
    pub fn create_local(&self, dir: &Path, origin: &str) -> Result<()> {
        let nodes = self
            .state
            .borrow()
            .remotes
            .get(origin)
            .map(|remote| remote.nodes.clone())
            .unwrap_or_default();
        let head = nodes.last().cloned();
        self.register(
            dir,
            FakeRepo {
                origin: Some(origin.to_string()),
                nodes,
                current: head,
                dirty: false,
            },
        )
    }

    /// Mark the working copy in `dir` as having local changes.
    pub fn set_dirty(&self, dir: &Path) {
        if let Some(repo) = self.state.borrow_mut().repos.get_mut(dir) {
            repo.dirty = true;
        }
    }

    /// Fail the next call in `phase` with `err`. Failures queue up.
    pub fn fail_next(&self, phase: Phase, err: BackendError) {
        self.state
            .borrow_mut()
            .next_failures
            .entry(phase)
            .or_default()
            .push_back(err);
    }

    /// Fail every call in `phase` with `err`.
    pub fn fail_always(&self, phase: Phase, err: BackendError) {
        self.state
            .borrow_mut()
            .persistent_failures
            .insert(phase, err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn network_calls(&self) -> usize {
        self.count(Call::is_network)
    }

    pub fn clone_calls(&self) -> usize {
        self.count(|call| matches!(call, Call::Clone { .. }))
    }

    pub fn pull_calls(&self) -> usize {
        self.count(|call| matches!(call, Call::Pull { .. }))
    }

    /// Checked-out node of the repository in `dir`.
    pub fn current(&self, dir: &Path) -> Option<String> {
        self.state
            .borrow()
            .repos
            .get(dir)
            .and_then(|repo| repo.current.clone())
    }

    /// Recorded origin of the repository in `dir`.
    pub fn origin(&self, dir: &Path) -> Option<String> {
        self.state
            .borrow()
            .repos
            .get(dir)
            .and_then(|repo| repo.origin.clone())
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn register(&self, dir: &Path, repo: FakeRepo) -> Result<()> {
        fs::create_dir_all(dir.join(".hg"))?;
        fs::write(dir.join(".hg").join("requires"), "store\n")?;
        self.state.borrow_mut().repos.insert(dir.to_path_buf(), repo);
        Ok(())
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn clone_repo(&self, url: &str, dest: &Path) -> BackendResult<()> {
        self.record(Call::Clone {
            url: url.to_string(),
        });
        let not_empty = fs::read_dir(dest)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if not_empty {
            return Err(BackendError::fatal(
                Phase::Clone,
                format!("abort: destination '{}' is not empty", dest.display()),
            ));
        }

        let failure = self.state.borrow_mut().take_failure(Phase::Clone);
        if let Some(err) = failure {
            // Interrupted clones leave partial metadata behind.
            let _ = fs::create_dir_all(dest.join(".hg"));
            let _ = fs::write(dest.join(".hg").join("partial"), "");
            return Err(err);
        }

        let nodes = self.state.borrow().remote(Phase::Clone, url)?.nodes.clone();
        self.register(
            dest,
            FakeRepo {
                origin: Some(anchored(url)),
                nodes,
                current: None,
                dirty: false,
            },
        )
        .map_err(|err| BackendError::fatal(Phase::Clone, err.to_string()))
    }

    fn pull(&self, repo: &Path, url: &str, rev: &RevisionSpec) -> BackendResult<()> {
        self.record(Call::Pull {
            url: url.to_string(),
            rev: rev.to_string(),
        });
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.take_failure(Phase::Pull) {
            return Err(err);
        }
        let remote = state.remote(Phase::Pull, url)?.clone();
        let node = remote.resolve(rev).ok_or_else(|| {
            BackendError::fatal(Phase::Pull, format!("abort: unknown revision '{rev}'"))
        })?;
        let local = state.repo_mut(Phase::Pull, repo)?;
        for known in &remote.nodes {
            if !local.nodes.contains(known) {
                local.nodes.push(known.clone());
            }
            if *known == node {
                break;
            }
        }
        Ok(())
    }

    fn update(&self, repo: &Path, rev: &RevisionSpec) -> BackendResult<String> {
        self.record(Call::Update {
            rev: rev.to_string(),
        });
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.take_failure(Phase::Update) {
            return Err(err);
        }
        let local = state.repo_mut(Phase::Update, repo)?;
        let node = match rev {
            RevisionSpec::DefaultBranchHead => local.nodes.last().cloned(),
            RevisionSpec::Literal(rev) => find_node(&local.nodes, rev),
        }
        .ok_or_else(|| {
            BackendError::fatal(
                Phase::Update,
                format!("revision not found: abort: unknown revision '{rev}'"),
            )
        })?;
        local.current = Some(node.clone());
        local.dirty = false;
        Ok(node)
    }

    fn identify(&self, repo: &Path) -> BackendResult<String> {
        let mut state = self.state.borrow_mut();
        let local = state.repo_mut(Phase::Identify, repo)?;
        Ok(local.current.clone().unwrap_or_else(|| "0".repeat(40)))
    }

    fn purge(&self, repo: &Path) -> BackendResult<()> {
        self.record(Call::Purge);
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.take_failure(Phase::Purge) {
            return Err(err);
        }
        state.repo_mut(Phase::Purge, repo)?.dirty = false;
        Ok(())
    }

    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(".hg").is_dir()
    }

    fn interrupted_operation(&self, repo: &Path) -> Option<String> {
        interrupted_operation(repo)
    }

    fn default_path(&self, repo: &Path) -> BackendResult<Option<String>> {
        let mut state = self.state.borrow_mut();
        Ok(state.repo_mut(Phase::Inspect, repo)?.origin.clone())
    }

    fn is_clean(&self, repo: &Path) -> BackendResult<bool> {
        let mut state = self.state.borrow_mut();
        Ok(!state.repo_mut(Phase::Inspect, repo)?.dirty)
    }

    fn remote_head(&self, url: &str, rev: &RevisionSpec) -> BackendResult<String> {
        self.record(Call::RemoteHead {
            url: url.to_string(),
        });
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.take_failure(Phase::Inspect) {
            return Err(err);
        }
        let node = state.remote(Phase::Inspect, url)?.resolve(rev).ok_or_else(|| {
            BackendError::fatal(Phase::Inspect, format!("abort: unknown revision '{rev}'"))
        })?;
        // `hg identify --id` prints the short form.
        Ok(node[..12].to_string())
    }
}

/// Seeder that unpacks a fake repository cloned from `origin`.
#[derive(Debug, Clone)]
pub struct FakeSeeder {
    backend: FakeBackend,
    origin: Option<String>,
}

impl FakeSeeder {
    /// Seeds every directory with a repository cloned from `origin`.
    pub fn hit(backend: &FakeBackend, origin: &str) -> Self {
        Self {
            backend: backend.clone(),
            origin: Some(origin.to_string()),
        }
    }

    /// Leaves partial content behind and reports a broken tarball.
    pub fn broken(backend: &FakeBackend) -> Self {
        Self {
            backend: backend.clone(),
            origin: None,
        }
    }
}

impl CloneSeeder for FakeSeeder {
    fn seed(&self, _url: &str, dest: &Path) -> Result<bool> {
        match &self.origin {
            Some(origin) => {
                self.backend.create_local(dest, origin)?;
                Ok(true)
            }
            None => {
                fs::create_dir_all(dest)?;
                fs::write(dest.join("partial-extract"), "")?;
                anyhow::bail!("gzip: stdin: unexpected end of file")
            }
        }
    }
}

fn find_node(nodes: &[String], rev: &str) -> Option<String> {
    let rev = rev.to_ascii_lowercase();
    nodes.iter().find(|node| node.starts_with(&rev)).cloned()
}

/// Locator as `hg` records it: relative local paths anchored at the cwd.
fn anchored(url: &str) -> String {
    match env::current_dir() {
        Ok(cwd) => absolutize_local(url, &cwd),
        Err(_) => url.to_string(),
    }
}
