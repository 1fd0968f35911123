use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize tracing for the relay.
///
/// Logs go to stderr so encoder output and our own lines interleave on the
/// same diagnostic stream. `verbose` mirrors the document's `DEBUG` flag.
pub fn init(service_name: &str, verbose: bool) -> Result<()> {
    // Default: info (debug when verbose) for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,tgze_core={level},tgze_telegram={level},tgze_ytdlp={level},tgze_ffmpeg={level},{service_name}={level}"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::Config(format!("logging init failed: {e}")))
}
