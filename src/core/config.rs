use once_cell::sync::Lazy;
use std::env;

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: kassabot.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "kassabot.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: kassabot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "kassabot.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Mailbox watcher tuning that is not per-deployment (per-deployment
/// settings live in the settings table and are re-read every cycle,
/// see `mailwatch::settings`).
pub mod mailwatch {
    use std::time::Duration;

    /// Sleep when the watcher is disabled or credentials are missing,
    /// before re-reading settings.
    pub const DISABLED_RECHECK_SECS: u64 = 30;

    /// Backoff after an unexpected cycle error.
    pub const ERROR_BACKOFF_SECS: u64 = 10;

    /// Bound on graceful shutdown: how long `stop()` waits for the loop
    /// to observe cancellation and close the mailbox.
    pub const STOP_TIMEOUT_SECS: u64 = 75;

    /// Ceiling on every downstream call into the cashdesk gateway.
    pub const GATEWAY_TIMEOUT_SECS: u64 = 30;

    pub fn disabled_recheck() -> Duration {
        Duration::from_secs(DISABLED_RECHECK_SECS)
    }

    pub fn error_backoff() -> Duration {
        Duration::from_secs(ERROR_BACKOFF_SECS)
    }

    pub fn stop_timeout() -> Duration {
        Duration::from_secs(STOP_TIMEOUT_SECS)
    }

    pub fn gateway_timeout() -> Duration {
        Duration::from_secs(GATEWAY_TIMEOUT_SECS)
    }
}
