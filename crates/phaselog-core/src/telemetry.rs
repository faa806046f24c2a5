//! Process-wide diagnostics for the `phaselog` binary.
//!
//! stdout carries the aggregated log stream and nothing else, so every
//! diagnostic line is written to stderr.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives for phaselog's own diagnostics. Falls back to `RUST_LOG`.
pub const LOG_FILTER_ENV: &str = "PHASELOG_LOG";

/// Install the global subscriber. Only the first call in a process wins.
pub fn init_tracing(json: bool, level: Level) {
    let directives = std::env::var(LOG_FILTER_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok();
    let filter = log_filter(directives.as_deref(), level);

    let (plain, structured) = if json {
        let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
        (None, Some(stderr.json()))
    } else {
        let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
        (Some(stderr), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init()
        .ok();
}

// Unparseable directives fall back to `level` rather than silencing output.
fn log_filter(directives: Option<&str>, level: Level) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_str()))
}
