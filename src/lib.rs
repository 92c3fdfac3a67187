//! Kassabot — Telegram cash-desk bot core built around the automated
//! deposit reconciliation watcher.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, shared domain types
//! - `storage`: sqlite ledger, settings, audit/health tables
//! - `mailwatch`: the mailbox watcher (IMAP connector, bank-notification
//!   parser, request matcher, confirmation orchestrator)
//! - `gateway`: seams to the bookmaker cashdesk and the admin mirror
//! - `telegram`: user/operator notifications

pub mod cli;
pub mod core;
pub mod gateway;
pub mod mailwatch;
pub mod storage;
pub mod telegram;

pub use crate::core::{config, AppError, AppResult};
pub use mailwatch::{MailWatcher, WatcherDeps};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
