//! Diagnostic tracing for checkout runs.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Stdout is reserved
//! for the checkout result so callers can capture the final revision.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset, which still shows
/// retries and destructive transitions.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=tc_checkout=debug tc-checkout /work https://hg.mozilla.org/mozilla-central
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
