//! Diagnostic tracing for the rollout binary.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG`. Operator-facing
//! progress lines are printed to stdout by the binary and are never affected by
//! the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=rollout=debug rollout upgrade web-1 web-2
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
