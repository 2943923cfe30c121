//! Process-wide tracing setup.
//!
//! Logs go to stderr so stdout stays clean for rendered output. `RUST_LOG`
//! overrides the level picked from `--verbose`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "sql_approval_gate=warn";
const VERBOSE_FILTER: &str = "sql_approval_gate=debug,sqlx=warn";

/// Install the global subscriber. Calling it twice keeps the first one.
pub fn init(verbose: bool, json: bool) {
    let fallback = if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let _ = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
}
