//! Tracing setup for the two run modes.
//!
//! CLI verbs keep stderr quiet (warnings only, no timestamps); the worker
//! logs at info with full formatting. The service manager redirects worker
//! stdio to log files under the settings directory (launchd) or the journal
//! (systemd), so no file appender is needed here.

use tracing_subscriber::EnvFilter;

/// Terse stderr output for short-lived CLI invocations.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Full formatting for the long-lived worker process.
pub fn init_worker() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
