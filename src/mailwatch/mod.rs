//! Automated deposit reconciliation: watch a mailbox for bank
//! payment-notification emails, extract the paid amount, match it against
//! outstanding deposit requests and drive them toward auto-completion.

pub mod confirm;
pub mod imap;
pub mod matcher;
pub mod parser;
pub mod settings;
pub mod watcher;

pub use confirm::ConfirmOutcome;
pub use parser::{BankNotification, BankParser, BankRegistry};
pub use settings::WatchSettings;
pub use watcher::{poll_once, MailWatcher, MessageOutcome, WatcherDeps};
