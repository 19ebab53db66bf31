//! Tracing setup helper.
//!
//! The engine logs through `tracing`; embedding applications that already
//! install a subscriber can skip this entirely.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber honoring `RUST_LOG`, falling back to the
/// given default directive. Safe to call more than once; later calls are
/// no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
