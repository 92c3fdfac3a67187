//! Per-cycle watcher settings.
//!
//! Re-read from the settings store at the top of every cycle, so
//! operators can retune or disable the mailbox listener without
//! restarting the bot. Resolution order per key: environment variable
//! (`MAILWATCH_*`) → persisted setting (`mailwatch_*`) → default.
//! Mailbox credentials additionally fall back to the active payment
//! requisite, whose row carries the inbox that receives that bank's
//! notifications.

use std::env;

use rusqlite::Connection;

use crate::core::types::Bank;
use crate::storage::settings as store;

pub const DEFAULT_FOLDER: &str = "INBOX";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;

const MIN_INTERVAL_SECS: u64 = 5;
const MAX_INTERVAL_SECS: u64 = 600;

const MIN_KEEPALIVE_SECS: u64 = 10;
// RFC 2177 asks clients to re-issue IDLE at least every 29 minutes.
const MAX_KEEPALIVE_SECS: u64 = 1740;

/// Snapshot of the watcher configuration for one cycle.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub enabled: bool,
    pub imap_host: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub folder: String,
    pub bank: Bank,
    pub interval_secs: u64,
    pub idle_enabled: bool,
    pub keepalive_secs: u64,
}

/// Fully-resolved mailbox credentials.
#[derive(Debug, Clone)]
pub struct MailCredentials {
    pub host: String,
    pub email: String,
    pub password: String,
}

impl WatchSettings {
    /// Resolve the current settings. Missing credentials are reported
    /// through [`WatchSettings::credentials`] returning `None`, never as
    /// an error.
    pub fn load(conn: &Connection) -> WatchSettings {
        let enabled = resolve(conn, "enabled")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);
        let bank = resolve(conn, "bank")
            .and_then(|v| Bank::from_code(&v))
            .unwrap_or(Bank::Mbank);

        let mut imap_host = resolve(conn, "imap_host");
        let mut email = resolve(conn, "email");
        let mut password = resolve(conn, "password");

        if imap_host.is_none() || email.is_none() || password.is_none() {
            match store::active_requisite(conn, bank.code()) {
                Ok(Some(req)) => {
                    imap_host = imap_host.or(non_empty(req.imap_host));
                    email = email.or(non_empty(req.email));
                    password = password.or(non_empty(req.email_password));
                }
                Ok(None) => {}
                Err(e) => log::error!("Failed to read the active requisite: {}", e),
            }
        }

        let folder = resolve(conn, "folder").unwrap_or_else(|| DEFAULT_FOLDER.to_string());
        let interval_secs = resolve(conn, "interval_secs")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_INTERVAL_SECS)
            .clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS);
        let idle_enabled = resolve(conn, "idle_enabled")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);
        let keepalive_secs = resolve(conn, "keepalive_secs")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_KEEPALIVE_SECS)
            .clamp(MIN_KEEPALIVE_SECS, MAX_KEEPALIVE_SECS);

        WatchSettings {
            enabled,
            imap_host,
            email,
            password,
            folder,
            bank,
            interval_secs,
            idle_enabled,
            keepalive_secs,
        }
    }

    /// `Some` only when host, email and password all resolved.
    pub fn credentials(&self) -> Option<MailCredentials> {
        Some(MailCredentials {
            host: self.imap_host.clone()?,
            email: self.email.clone()?,
            password: self.password.clone()?,
        })
    }
}

/// Environment variable first, persisted setting second.
fn resolve(conn: &Connection, key: &str) -> Option<String> {
    let env_key = format!("MAILWATCH_{}", key.to_ascii_uppercase());
    if let Ok(v) = env::var(&env_key) {
        let v = v.trim().to_string();
        if !v.is_empty() {
            return Some(v);
        }
    }
    match store::get_setting(conn, &format!("mailwatch_{}", key)) {
        Ok(v) => non_empty(v),
        Err(e) => {
            log::error!("Failed to read setting mailwatch_{}: {}", key, e);
            None
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
