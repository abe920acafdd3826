//! Tracing setup for the `devflow` binary.
//!
//! Reads `RUST_LOG`, defaulting to `info`. Output goes to stderr so it never
//! mixes with command output such as `devflow status`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `json` selects machine-readable lines;
/// `verbose` lowers the default level to `debug`.
pub fn init(json: bool, verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init();
    }
}
