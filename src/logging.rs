//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! `-v` and `-q` pick the level; otherwise the `MKRUN_LOG` environment
//! variable is used as a filter (e.g. `mkrun=debug`), defaulting to `info`.
//! Logs go to stderr so stdout stays with the commands being run.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "MKRUN_LOG";

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(verbose: bool, quiet: bool) {
    fmt()
        .with_env_filter(filter(verbose, quiet))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn filter(verbose: bool, quiet: bool) -> EnvFilter {
    match (verbose, quiet) {
        (true, _) => EnvFilter::new("debug"),
        (false, true) => EnvFilter::new("warn"),
        (false, false) => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    }
}
