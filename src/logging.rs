//! Tracing setup for the command-line binary.
//!
//! Logs go to stderr so that stdout stays free for JSON output. `RUST_LOG`
//! overrides the default level.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default directive: warnings everywhere, `info` (or `debug` when verbose)
/// for this crate.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "warn,tabscribe=debug"
    } else {
        "warn,tabscribe=info"
    }
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
