//! Tracing setup.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize the process-wide subscriber.
///
/// The `LOG` env var overrides the verbosity-derived default directive.
/// Safe to call more than once; only the first call installs.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn level_from_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
