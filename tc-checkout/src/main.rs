//! Bring a directory to a mercurial revision for a TaskCluster task.
//!
//! Prints the checked-out node on success. The directory itself is the only
//! state; running the same command twice is a no-op the second time.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tc_checkout::core::types::{CheckoutRequest, ReconciliationResult};
use tc_checkout::engine::Reconciler;
use tc_checkout::error::CheckoutError;
use tc_checkout::exit_codes;
use tc_checkout::io::backend::{Backend, BackendKind};
use tc_checkout::io::cache::{CloneSeeder, NoCache, TaskclusterCache};
use tc_checkout::io::config::{CheckoutConfig, load_config_from};
use tc_checkout::io::hg::HgBackend;
use tc_checkout::logging;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "tc-checkout",
    version,
    about = "Check out a repository revision, reusing the directory when possible"
)]
struct Cli {
    /// Config file (default: ~/.tc-vcs/config.toml when present).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the full result as JSON instead of the revision.
    #[arg(long)]
    json: bool,

    /// Target directory for the working copy.
    directory: PathBuf,

    /// Repository the directory is cloned from.
    base_url: String,

    /// Repository holding the head revision (defaults to baseUrl).
    head_url: Option<String>,

    /// Revision to check out (defaults to the default-branch head).
    head_rev: Option<String>,

    /// Reference of the head revision. Accepted but ignored for mercurial.
    head_ref: Option<String>,
}

impl Cli {
    fn request(&self) -> CheckoutRequest {
        CheckoutRequest {
            directory: self.directory.clone(),
            base_url: Some(self.base_url.clone()),
            head_url: self.head_url.clone(),
            head_rev: self.head_rev.clone(),
            head_ref: self.head_ref.clone(),
        }
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let cfg = match load_config_from(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::FAILED;
        }
    };

    let outcome = match cfg.backend {
        BackendKind::Mercurial => {
            let backend = HgBackend::new(cfg.hg_options());
            match cfg.cache_options() {
                Some(options) => checkout(&cfg, backend, TaskclusterCache::new(options), cli),
                None => checkout(&cfg, backend, NoCache, cli),
            }
        }
    };

    match outcome {
        Ok(result) => match report(&result, cli.json) {
            Ok(()) => exit_codes::OK,
            Err(err) => {
                eprintln!("{err:#}");
                exit_codes::FAILED
            }
        },
        Err(err) => {
            eprintln!("{err}");
            exit_code(&err)
        }
    }
}

fn checkout<B: Backend, S: CloneSeeder>(
    cfg: &CheckoutConfig,
    backend: B,
    seeder: S,
    cli: &Cli,
) -> Result<ReconciliationResult, CheckoutError> {
    debug!(backend = backend.name(), "backend selected");
    Reconciler::with_seeder(backend, seeder, cfg.retry_policy()).reconcile(&cli.request())
}

fn report(result: &ReconciliationResult, json: bool) -> Result<()> {
    if json {
        let payload = serde_json::to_string(result).context("serialize result")?;
        println!("{payload}");
    } else {
        println!("{}", result.final_revision);
    }
    Ok(())
}

fn exit_code(err: &CheckoutError) -> i32 {
    match err {
        CheckoutError::InvalidRequest(_) => exit_codes::INVALID,
        _ => exit_codes::FAILED,
    }
}
