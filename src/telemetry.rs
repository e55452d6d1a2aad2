//! Logging setup for the binary.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber on stderr, filtered by `RUST_LOG` (default `info`).
///
/// Stdout carries the balance report, so logs must stay off it. Calling this
/// more than once is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
