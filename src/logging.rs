//! Logging setup for the `tetra` binary.

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize logging to stderr.
///
/// `RUST_LOG` overrides the filter. Otherwise each `-v` raises the level
/// for the tetra crate: warn, info, debug, trace.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("warn,tetra={level}")));

    // A second init (tests driving `main` twice) is not an error.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
