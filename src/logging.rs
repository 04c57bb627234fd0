//! Tracing subscriber setup.
//!
//! Logs go to stderr so that stdout carries only the per-file progress
//! lines. `RUST_LOG` overrides the level chosen here:
//!
//! ```bash
//! RUST_LOG=bucket=trace bucket upload ./site s3://my-bucket
//! RUST_LOG=opendal=debug bucket upload ./site s3://my-bucket
//! ```

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `debug` raises the default level from
/// `info` to `debug`.
pub fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(debug)
        .with_writer(std::io::stderr)
        .init();
}
