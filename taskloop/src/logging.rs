//! Operator-facing tracing output.
//!
//! Phase progress (picked task, plan generated, tests failed, ...) is the
//! main output of a long-running `taskloop continuous`, so the default filter
//! keeps this crate at `info`. Everything goes to stderr; stdout is reserved
//! for command results such as `taskloop select`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "taskloop=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `taskloop=info` if unset or invalid.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=taskloop=debug taskloop continuous
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
