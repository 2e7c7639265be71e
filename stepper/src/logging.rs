//! Diagnostic tracing for stepper runs.
//!
//! Events go to stderr and never mix with the symbolic-step echo on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (from
/// `stepper.toml`, `warn` unless configured) is used. Output: stderr, compact.
///
/// # Example
/// ```bash
/// RUST_LOG=stepper=debug stepper run setup.toml
/// ```
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (tests, embedders) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
