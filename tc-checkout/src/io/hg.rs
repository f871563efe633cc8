//! Mercurial adapter for checkout reconciliation.
//!
//! Every operation is a single `hg` subprocess call with `HGPLAIN=1` so that
//! user aliases, localization and pagers cannot change the output we parse.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::classifier::{
    FailureClass, classify_network_failure, is_interrupted_transaction, is_unknown_revision,
    summarize_reason,
};
use crate::core::types::{Phase, RevisionSpec};
use crate::error::{BackendError, BackendResult};
use crate::io::backend::Backend;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Process limits for `hg` invocations.
#[derive(Debug, Clone)]
pub struct HgOptions {
    /// Executable to run.
    pub binary: PathBuf,
    /// Limit for clone, pull and update.
    pub command_timeout: Duration,
    /// Limit for read-only probes.
    pub probe_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for HgOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("hg"),
            command_timeout: Duration::from_secs(60 * 60),
            probe_timeout: Duration::from_secs(60),
            output_limit_bytes: 1_000_000,
        }
    }
}

/// [`Backend`] implementation that shells out to `hg`.
#[derive(Debug, Clone, Default)]
pub struct HgBackend {
    options: HgOptions,
}

impl HgBackend {
    pub fn new(options: HgOptions) -> Self {
        Self { options }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.options.binary);
        cmd.env("HGPLAIN", "1").arg("--noninteractive").args(args);
        cmd
    }

    fn run(&self, phase: Phase, args: &[&str], timeout: Duration) -> BackendResult<CommandOutput> {
        debug!(%phase, args = %args.join(" "), "running hg");
        run_command_with_timeout(self.command(args), timeout, self.options.output_limit_bytes)
            .map_err(|err| BackendError::fatal(phase, format!("hg {}: {err:#}", args.join(" "))))
    }

    /// Run a command that talks to a remote; failures are classified.
    fn run_network(&self, phase: Phase, args: &[&str], timeout: Duration) -> BackendResult<String> {
        let output = self.run(phase, args, timeout)?;
        if output.success() {
            return Ok(output.stdout_lossy());
        }
        Err(network_failure(phase, &output, timeout))
    }

    /// Run a command that only touches the local repository; failures are fatal.
    fn run_local(&self, phase: Phase, args: &[&str]) -> BackendResult<String> {
        let output = self.run(phase, args, self.options.command_timeout)?;
        if output.success() {
            return Ok(output.stdout_lossy());
        }
        Err(local_failure(phase, &output))
    }

    fn run_probe(&self, args: &[&str]) -> BackendResult<CommandOutput> {
        self.run(Phase::Inspect, args, self.options.probe_timeout)
    }
}

impl Backend for HgBackend {
    fn name(&self) -> &'static str {
        "mercurial"
    }

    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    fn clone_repo(&self, url: &str, dest: &Path) -> BackendResult<()> {
        let dest = path_arg(dest);
        self.run_network(
            Phase::Clone,
            &["clone", "--noupdate", url, &dest],
            self.options.command_timeout,
        )?;
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %repo.display(), url = %url, rev = %rev))]
    fn pull(&self, repo: &Path, url: &str, rev: &RevisionSpec) -> BackendResult<()> {
        let repo = path_arg(repo);
        self.run_network(
            Phase::Pull,
            &["pull", "-R", &repo, "-r", rev.as_backend_arg(), url],
            self.options.command_timeout,
        )?;
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %repo.display(), rev = %rev))]
    fn update(&self, repo: &Path, rev: &RevisionSpec) -> BackendResult<String> {
        let repo_arg = path_arg(repo);
        self.run_local(
            Phase::Update,
            &["update", "-R", &repo_arg, "--clean", "-r", rev.as_backend_arg()],
        )?;
        self.identify(repo)
    }

    fn identify(&self, repo: &Path) -> BackendResult<String> {
        let repo = path_arg(repo);
        let out = self.run_local(
            Phase::Identify,
            &["log", "-R", &repo, "-r", ".", "--template", "{node}"],
        )?;
        let node = out.trim().to_string();
        if node.is_empty() {
            return Err(BackendError::fatal(
                Phase::Identify,
                "hg log returned no revision",
            ));
        }
        Ok(node)
    }

    #[instrument(skip_all, fields(repo = %repo.display()))]
    fn purge(&self, repo: &Path) -> BackendResult<()> {
        let repo = path_arg(repo);
        self.run_local(Phase::Purge, &["update", "-R", &repo, "--clean", "-r", "."])?;
        self.run_local(
            Phase::Purge,
            &[
                "--config",
                "extensions.purge=",
                "purge",
                "-R",
                &repo,
                "--all",
            ],
        )?;
        Ok(())
    }

    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(".hg").is_dir()
    }

    fn interrupted_operation(&self, repo: &Path) -> Option<String> {
        interrupted_operation(repo)
    }

    fn default_path(&self, repo: &Path) -> BackendResult<Option<String>> {
        let repo = path_arg(repo);
        let output = self.run_probe(&["paths", "-R", &repo, "default"])?;
        if output.success() {
            let path = output.stdout_lossy().trim().to_string();
            return Ok((!path.is_empty()).then_some(path));
        }
        // `hg paths NAME` exits 1 with "not found!" when the path is unset.
        let stderr = output.stderr_lossy();
        if output.status.code() == Some(1) && stderr.contains("not found") {
            return Ok(None);
        }
        Err(local_failure(Phase::Inspect, &output))
    }

    fn is_clean(&self, repo: &Path) -> BackendResult<bool> {
        let repo = path_arg(repo);
        let output = self.run_probe(&[
            "status",
            "-R",
            &repo,
            "--modified",
            "--added",
            "--removed",
            "--deleted",
            "--unknown",
        ])?;
        if !output.success() {
            return Err(local_failure(Phase::Inspect, &output));
        }
        let changes = output.stdout_lossy();
        let clean = changes.trim().is_empty();
        if !clean {
            debug!(
                changed = changes.lines().count(),
                "working copy has local changes"
            );
        }
        Ok(clean)
    }

    #[instrument(skip_all, fields(url = %url, rev = %rev))]
    fn remote_head(&self, url: &str, rev: &RevisionSpec) -> BackendResult<String> {
        let out = self.run_network(
            Phase::Inspect,
            &["identify", "--id", "-r", rev.as_backend_arg(), url],
            self.options.probe_timeout,
        )?;
        let node = out.trim().trim_end_matches('+').to_string();
        if node.is_empty() {
            return Err(BackendError::fatal(
                Phase::Inspect,
                "hg identify returned no revision",
            ));
        }
        Ok(node)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Files mercurial leaves under `.hg` when a transaction or update is killed.
const INTERRUPTED_STATE_FILES: &[(&str, &str)] = &[
    ("store/journal", "abandoned transaction"),
    ("journal", "abandoned transaction"),
    ("updatestate", "interrupted update"),
];

/// Inspect `repo/.hg` for leftovers of a killed `hg` process.
///
/// Shared with the in-memory backend, which lays out `.hg` the same way.
pub fn interrupted_operation(repo: &Path) -> Option<String> {
    let metadata = repo.join(".hg");
    INTERRUPTED_STATE_FILES
        .iter()
        .find(|(file, _)| metadata.join(file).exists())
        .map(|(file, what)| format!("{what} (.hg/{file})"))
}

fn network_failure(phase: Phase, output: &CommandOutput, timeout: Duration) -> BackendError {
    if output.timed_out {
        warn!(%phase, timeout_secs = timeout.as_secs(), "hg timed out");
        return BackendError::transient(
            phase,
            format!("hg timed out after {}s", timeout.as_secs()),
        );
    }
    let stderr = output.stderr_lossy();
    let reason = summarize_reason(&stderr);
    if is_interrupted_transaction(&stderr) {
        return BackendError::interrupted(phase, reason);
    }
    match classify_network_failure(&stderr) {
        FailureClass::Transient => BackendError::transient(phase, reason),
        FailureClass::Fatal => BackendError::fatal(phase, reason),
    }
}

fn local_failure(phase: Phase, output: &CommandOutput) -> BackendError {
    if output.timed_out {
        return BackendError::fatal(phase, "hg timed out");
    }
    let stderr = output.stderr_lossy();
    let reason = summarize_reason(&stderr);
    if is_interrupted_transaction(&stderr) {
        return BackendError::interrupted(phase, reason);
    }
    if is_unknown_revision(&stderr) {
        return BackendError::fatal(phase, format!("revision not found: {reason}"));
    }
    BackendError::fatal(phase, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn failed_output(stderr: &str, timed_out: bool) -> CommandOutput {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        CommandOutput {
            status: ExitStatus::from_raw(if timed_out { 9 } else { 255 << 8 }),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
            timed_out,
        }
    }

    #[test]
    fn commands_run_in_plain_noninteractive_mode() {
        let backend = HgBackend::default();
        let cmd = backend.command(&["status"]);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["--noninteractive", "status"]);
        let plain = cmd
            .get_envs()
            .find(|(key, _)| *key == "HGPLAIN")
            .and_then(|(_, value)| value.map(|v| v.to_string_lossy().to_string()));
        assert_eq!(plain.as_deref(), Some("1"));
    }

    #[test]
    fn missing_binary_is_fatal() {
        let backend = HgBackend::new(HgOptions {
            binary: PathBuf::from("tc-checkout-no-such-hg"),
            ..HgOptions::default()
        });
        let temp = tempfile::tempdir().expect("tempdir");
        let err = backend
            .clone_repo("https://example/repoA", &temp.path().join("dest"))
            .expect_err("spawn should fail");
        assert!(!err.is_transient());
        assert_eq!(err.phase(), Phase::Clone);
    }

    #[test]
    fn directory_without_metadata_is_not_a_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = HgBackend::default();
        assert!(!backend.is_repository(temp.path()));
        std::fs::create_dir(temp.path().join(".hg")).expect("mkdir");
        assert!(backend.is_repository(temp.path()));
    }

    #[test]
    #[cfg(unix)]
    fn network_timeout_is_transient() {
        let output = failed_output("", true);
        let err = network_failure(Phase::Pull, &output, Duration::from_secs(90));
        assert_eq!(
            err,
            BackendError::transient(Phase::Pull, "hg timed out after 90s")
        );
    }

    #[test]
    #[cfg(unix)]
    fn timed_out_stderr_is_transient() {
        let stderr = "pulling from https://hg.example/repoA\nabort: error: Connection timed out\n";
        let output = failed_output(stderr, false);
        let err = network_failure(Phase::Clone, &output, Duration::from_secs(90));
        assert!(err.is_transient());
        assert_eq!(err.reason(), "abort: error: Connection timed out");
    }

    #[test]
    #[cfg(unix)]
    fn local_timeout_is_fatal() {
        let err = local_failure(Phase::Update, &failed_output("", true));
        assert_eq!(err, BackendError::fatal(Phase::Update, "hg timed out"));
    }

    #[test]
    #[cfg(unix)]
    fn abandoned_transaction_is_reported_as_interrupted() {
        let stderr =
            "abort: abandoned transaction found!\n(run 'hg recover' to clean up transaction)\n";
        let output = failed_output(stderr, false);
        let pull = network_failure(Phase::Pull, &output, Duration::from_secs(1));
        assert_eq!(
            pull,
            BackendError::interrupted(Phase::Pull, "abort: abandoned transaction found!")
        );
        let update = local_failure(Phase::Update, &output);
        assert!(matches!(update, BackendError::Interrupted { phase: Phase::Update, .. }));
    }

    #[test]
    fn leftover_journal_marks_an_interrupted_operation() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join(".hg/store")).expect("mkdir");
        assert_eq!(interrupted_operation(temp.path()), None);

        std::fs::write(temp.path().join(".hg/updatestate"), "").expect("write");
        assert_eq!(
            interrupted_operation(temp.path()).as_deref(),
            Some("interrupted update (.hg/updatestate)")
        );
        std::fs::write(temp.path().join(".hg/store/journal"), "").expect("write");
        assert_eq!(
            interrupted_operation(temp.path()).as_deref(),
            Some("abandoned transaction (.hg/store/journal)")
        );
    }
}
