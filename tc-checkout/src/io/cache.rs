//! Seeding fresh checkouts from TaskCluster clone tarballs.
//!
//! Layout of the local cache:
//!
//! ```text
//! <cache dir>/clones/<alias>.tar.gz
//! ```
//!
//! A missing tarball is looked up in the TaskCluster index under
//! `<namespace>.<md5(alias)>` and downloaded from the queue artifact
//! `public/<alias>.tar.gz` of the indexed task. The tarball holds a single
//! top-level folder whose contents become the checkout directory.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::alias::{alias, cache_namespace, urljoin};
use crate::io::process::run_command_with_timeout;

/// Source of pre-packaged repositories for fresh clones.
pub trait CloneSeeder {
    /// Populate the empty or missing directory `dest` with a repository of `url`.
    ///
    /// Returns `Ok(false)` when no cached copy is available. An error means a
    /// cached copy was found but could not be unpacked; `dest` may then hold
    /// partial content.
    fn seed(&self, url: &str, dest: &Path) -> Result<bool>;
}

/// Seeder used when caching is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CloneSeeder for NoCache {
    fn seed(&self, _url: &str, _dest: &Path) -> Result<bool> {
        Ok(false)
    }
}

/// Locations and limits for the TaskCluster clone cache.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Root of the local cache (`~/.tc-vcs` by default).
    pub dir: PathBuf,
    pub namespace: String,
    pub index_url: String,
    pub queue_url: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// [`CloneSeeder`] backed by the local tarball cache and the TaskCluster index.
#[derive(Debug, Clone)]
pub struct TaskclusterCache {
    options: CacheOptions,
}

#[derive(Debug, Deserialize)]
struct IndexedTask {
    #[serde(rename = "taskId")]
    task_id: String,
}

impl TaskclusterCache {
    pub fn new(options: CacheOptions) -> Self {
        Self { options }
    }

    /// Local tarball path for a repository URL.
    ///
    /// Only plain components of the alias are kept so that local-path URLs
    /// cannot escape the cache directory.
    pub fn local_path(&self, url: &str) -> PathBuf {
        let file = format!("{}.tar.gz", alias(url));
        let relative: PathBuf = Path::new(&file)
            .components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .collect();
        self.options.dir.join("clones").join(relative)
    }

    /// Queue artifact URL for a task id.
    pub fn artifact_url(&self, task_id: &str, url: &str) -> String {
        let artifact = format!("public/{}.tar.gz", alias(url));
        urljoin(&[
            self.options.queue_url.as_str(),
            "task",
            task_id,
            "artifacts",
            artifact.as_str(),
        ])
    }

    /// Index URL listing the latest task that published a tarball for `url`.
    pub fn index_url(&self, url: &str) -> String {
        let namespace = cache_namespace(&self.options.namespace, &alias(url));
        urljoin(&[self.options.index_url.as_str(), "task", namespace.as_str()])
    }

    fn curl(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut cmd = Command::new("curl");
        cmd.args(["--fail", "--silent", "--show-error", "--location"])
            .args(args);
        let output =
            run_command_with_timeout(cmd, self.options.timeout, self.options.output_limit_bytes)?;
        if !output.success() {
            return Err(anyhow!(
                "curl {} failed: {}",
                args.join(" "),
                output.stderr_lossy().trim()
            ));
        }
        Ok(output.stdout)
    }

    fn lookup_remote(&self, url: &str) -> Result<String> {
        let index_url = self.index_url(url);
        let body = self.curl(&[index_url.as_str()])?;
        let task: IndexedTask = serde_json::from_slice(&body)
            .with_context(|| format!("parse indexed task from {index_url}"))?;
        let artifact = self.artifact_url(&task.task_id, url);
        debug!(artifact = %artifact, "remote cache located");
        Ok(artifact)
    }

    fn download(&self, artifact: &str, local: &Path) -> Result<()> {
        let parent = local
            .parent()
            .with_context(|| format!("cache path missing parent {}", local.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create cache directory {}", parent.display()))?;
        let tmp_path = local.with_extension("gz.tmp");
        let tmp_arg = tmp_path.to_string_lossy().to_string();
        if let Err(err) = self.curl(&["--output", tmp_arg.as_str(), artifact]) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        fs::rename(&tmp_path, local)
            .with_context(|| format!("replace cached tarball {}", local.display()))?;
        info!(path = %local.display(), "downloaded clone tarball");
        Ok(())
    }

    fn extract(&self, tarball: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
        let mut cmd = Command::new("tar");
        cmd.arg("-xzf")
            .arg(tarball)
            .arg("-C")
            .arg(dest)
            .arg("--strip-components=1");
        let output =
            run_command_with_timeout(cmd, self.options.timeout, self.options.output_limit_bytes)?;
        if !output.success() {
            return Err(anyhow!(
                "extract {} failed: {}",
                tarball.display(),
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }
}

impl CloneSeeder for TaskclusterCache {
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    fn seed(&self, url: &str, dest: &Path) -> Result<bool> {
        let local = self.local_path(url);
        if !local.exists() {
            let fetched = self
                .lookup_remote(url)
                .and_then(|artifact| self.download(&artifact, &local));
            if let Err(err) = fetched {
                info!(error = %format!("{err:#}"), "no remote clone cache available");
                return Ok(false);
            }
        }

        debug!(tarball = %local.display(), "extracting cached clone");
        if let Err(err) = self.extract(&local, dest) {
            warn!(tarball = %local.display(), "removing unusable cached clone");
            if let Err(remove_err) = fs::remove_file(&local) {
                warn!(error = %remove_err, "failed to remove cached clone");
            }
            return Err(err);
        }
        Ok(true)
    }
}
