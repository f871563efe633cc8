//! Checkout configuration stored in `~/.tc-vcs/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::retry::RetryPolicy;
use crate::io::backend::BackendKind;
use crate::io::cache::CacheOptions;
use crate::io::hg::HgOptions;

/// Directory under the home directory holding the config and clone cache.
pub const STATE_DIR_NAME: &str = ".tc-vcs";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Checkout configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below. Workers normally run without any config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckoutConfig {
    /// Version-control backend, selected once at startup.
    pub backend: BackendKind,

    /// Executable used for the mercurial backend.
    pub hg_binary: PathBuf,

    /// Wall-clock limit for clone, pull and update commands.
    pub command_timeout_secs: u64,

    /// Wall-clock limit for read-only probes (status, paths, remote identify).
    pub probe_timeout_secs: u64,

    /// Truncate captured backend stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts for clone and pull, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Seed fresh clones from TaskCluster tarballs.
    pub enabled: bool,
    /// Cache root; `~/.tc-vcs` when unset. A leading `~/` is expanded.
    pub dir: Option<PathBuf>,
    pub namespace: String,
    pub index_url: String,
    pub queue_url: String,
    /// Limit for index lookups, downloads and extraction.
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            multiplier: 2,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            namespace: "tc-vcs.v1.clones".to_string(),
            index_url: "https://index.taskcluster.net/v1".to_string(),
            queue_url: "https://queue.taskcluster.net/v1".to_string(),
            timeout_secs: 30 * 60,
        }
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mercurial,
            hg_binary: PathBuf::from("hg"),
            command_timeout_secs: 60 * 60,
            probe_timeout_secs: 60,
            output_limit_bytes: 1_000_000,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl CheckoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hg_binary.as_os_str().is_empty() {
            return Err(anyhow!("hg_binary must not be empty"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(anyhow!("probe_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.multiplier == 0 {
            return Err(anyhow!("retry.multiplier must be > 0"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(anyhow!(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms"
            ));
        }
        if self.cache.enabled {
            if self.cache.namespace.trim().is_empty() {
                return Err(anyhow!("cache.namespace must not be empty"));
            }
            if self.cache.timeout_secs == 0 {
                return Err(anyhow!("cache.timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn hg_options(&self) -> HgOptions {
        HgOptions {
            binary: self.hg_binary.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    /// Cache settings, or `None` when caching is disabled or no cache
    /// directory can be determined.
    pub fn cache_options(&self) -> Option<CacheOptions> {
        if !self.cache.enabled {
            return None;
        }
        let dir = match &self.cache.dir {
            Some(dir) => expand_home(dir)?,
            None => dirs::home_dir()?.join(STATE_DIR_NAME),
        };
        Some(CacheOptions {
            dir,
            namespace: self.cache.namespace.clone(),
            index_url: self.cache.index_url.clone(),
            queue_url: self.cache.queue_url.clone(),
            timeout: Duration::from_secs(self.cache.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        })
    }
}

/// `~/.tc-vcs/config.toml`, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load config from an explicit path, or from the default location.
///
/// An explicit path must exist; a missing default file yields
/// `CheckoutConfig::default()`.
pub fn load_config_from(explicit: Option<&Path>) -> Result<CheckoutConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow!("config file {} does not exist", path.display()));
            }
            load_config(path)
        }
        None => match default_config_path() {
            Some(path) => load_config(&path),
            None => {
                let cfg = CheckoutConfig::default();
                cfg.validate()?;
                Ok(cfg)
            }
        },
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CheckoutConfig::default()`.
pub fn load_config(path: &Path) -> Result<CheckoutConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = CheckoutConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CheckoutConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(cfg)
}

fn expand_home(path: &Path) -> Option<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map(|home| home.join(rest)),
        Err(_) => Some(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CheckoutConfig::default());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("missing.toml");
        let err = load_config_from(Some(missing.as_path())).expect_err("missing");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "hg_binary = \"/usr/local/bin/hg\"\n\n[retry]\nmax_attempts = 5\n\n[cache]\nenabled = false\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.hg_binary, PathBuf::from("/usr/local/bin/hg"));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.multiplier, 2);
        assert_eq!(cfg.backend, BackendKind::Mercurial);
        assert!(cfg.cache_options().is_none());
    }

    #[test]
    fn backend_is_parsed_by_name() {
        let cfg: CheckoutConfig = toml::from_str("backend = \"mercurial\"\n").expect("parse");
        assert_eq!(cfg.backend, BackendKind::Mercurial);
        assert!(toml::from_str::<CheckoutConfig>("backend = \"svn\"\n").is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[retry]\nmax_attempts = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("retry.max_attempts"));
    }

    #[test]
    fn retry_policy_uses_milliseconds() {
        let cfg = CheckoutConfig::default();
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
    }

    #[test]
    fn explicit_cache_dir_is_used() {
        let cfg = CheckoutConfig {
            cache: CacheConfig {
                dir: Some(PathBuf::from("/var/cache/tc-vcs")),
                ..CacheConfig::default()
            },
            ..CheckoutConfig::default()
        };
        let options = cfg.cache_options().expect("cache enabled");
        assert_eq!(options.dir, PathBuf::from("/var/cache/tc-vcs"));
        assert_eq!(options.namespace, "tc-vcs.v1.clones");
    }
}
