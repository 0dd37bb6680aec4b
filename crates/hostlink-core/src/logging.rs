//! Shared logging initialization for hostlink binaries and embedding hosts.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

/// Environment variable carrying the log level.
pub const LOG_ENV: &str = "HOSTLINK_LOG";

fn parse_level(raw: Option<&str>) -> tracing::Level {
    match raw.unwrap_or("info").trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Initialize process-level tracing output from `HOSTLINK_LOG`.
///
/// Safe to call multiple times; only the first call installs the subscriber.
/// Best-effort: if the host already installed a global subscriber, that one
/// is kept.
pub fn init() {
    let level = parse_level(std::env::var(LOG_ENV).ok().as_deref());
    init_with_level(level);
}

/// Same as [`init`] but with an explicit level (the binary's `--verbose`).
pub fn init_with_level(level: tracing::Level) {
    if INIT.get().is_some() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
}
