//! Diagnostic tracing for the engine.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. It is not
//! part of the product output: plans, diffs, verification logs and records
//! are always written to the artifacts directory, and CLI results are JSON
//! on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=patchgate=debug patchgate apply plan.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
