//! The reconcile loop: mailbox listening, per-message processing and the
//! audit/health trail.
//!
//! One loop per watcher instance; only one mailbox session is active at a
//! time. All IMAP calls block and run through `spawn_blocking`, so the
//! async scheduler (and the bot's message handling next to it) is never
//! starved. The loop is unkillable by transient IMAP, network or storage
//! errors: every cycle failure is logged and followed by a backoff, and
//! the cancellation flag is observed at every suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::task::JoinHandle;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::types::Bank;
use crate::gateway::{AdminSync, Cashdesk};
use crate::mailwatch::confirm::{self, ConfirmOutcome};
use crate::mailwatch::imap::{IdleOutcome, ImapSession};
use crate::mailwatch::matcher::{self, MatchOutcome};
use crate::mailwatch::parser::{extract_body, BankParser, BankRegistry};
use crate::mailwatch::settings::{MailCredentials, WatchSettings};
use crate::storage::{audit, get_connection, DbPool};
use crate::telegram::DepositNotifier;

/// External collaborators the watcher drives.
#[derive(Clone)]
pub struct WatcherDeps {
    pub pool: Arc<DbPool>,
    pub gateway: Arc<dyn Cashdesk>,
    pub notifier: Arc<dyn DepositNotifier>,
    pub admin_sync: Option<Arc<dyn AdminSync>>,
}

/// Tagged outcome of processing one email. The loop inspects the tag;
/// expected misses are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Not a recognizable bank notification.
    NotRecognized,
    /// No pending request carries this amount.
    NoMatch { amount: Decimal },
    /// Amount matched but no usable account id; left for an operator.
    Unresolved { amount: Decimal },
    /// Duplicate delivery; the bank leg was already recorded.
    AlreadyProcessed { amount: Decimal },
    /// Bank leg recorded; receipt still pending.
    BankMarked { amount: Decimal },
    /// Request fully completed.
    Completed { amount: Decimal },
    /// Cashdesk failed; request stays at `bank_received`.
    GatewayFailed { amount: Decimal },
    /// Storage failure mid-processing; the message stays unseen and is
    /// retried next cycle.
    Failed,
}

impl MessageOutcome {
    /// Misses and failures leave the message unseen so the next cycle
    /// retries it and an operator can find it in the mailbox.
    pub fn should_mark_seen(&self) -> bool {
        !matches!(
            self,
            MessageOutcome::NoMatch { .. }
                | MessageOutcome::Unresolved { .. }
                | MessageOutcome::Failed
        )
    }

    /// Reconcile-log row for this outcome; `None` for non-notifications.
    pub fn audit_row(&self) -> Option<(Decimal, bool, &'static str)> {
        match self {
            MessageOutcome::NotRecognized => None,
            MessageOutcome::NoMatch { amount } => Some((*amount, false, "no_match")),
            MessageOutcome::Unresolved { amount } => Some((*amount, false, "account_unresolved")),
            MessageOutcome::AlreadyProcessed { amount } => {
                Some((*amount, true, "already_processed"))
            }
            MessageOutcome::BankMarked { amount } => Some((*amount, true, "bank_received")),
            MessageOutcome::Completed { amount } => Some((*amount, true, "completed")),
            MessageOutcome::GatewayFailed { amount } => Some((*amount, true, "gateway_failed")),
            MessageOutcome::Failed => Some((Decimal::ZERO, false, "error")),
        }
    }
}

/// Background mailbox watcher with bounded-graceful stop.
pub struct MailWatcher {
    deps: WatcherDeps,
    registry: Arc<BankRegistry>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MailWatcher {
    pub fn new(deps: WatcherDeps) -> Self {
        Self {
            deps,
            registry: Arc::new(BankRegistry::default_registry()),
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the reconcile loop. A second call while running is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.cancel.store(false, Ordering::Relaxed);

        let deps = self.deps.clone();
        let registry = Arc::clone(&self.registry);
        let cancel = Arc::clone(&self.cancel);
        self.handle = Some(tokio::spawn(async move {
            run_loop(deps, registry, cancel).await;
        }));
        log::info!("Mail watcher started");
    }

    /// Signal cancellation and wait, bounded, for the loop to close the
    /// mailbox and return.
    pub async fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(config::mailwatch::stop_timeout(), handle).await {
            Ok(_) => log::info!("Mail watcher stopped"),
            Err(_) => {
                abort.abort();
                log::warn!(
                    "Mail watcher did not stop within {}s, task aborted",
                    config::mailwatch::STOP_TIMEOUT_SECS
                );
            }
        }
    }
}

async fn run_loop(deps: WatcherDeps, registry: Arc<BankRegistry>, cancel: Arc<AtomicBool>) {
    log::info!("Mail watcher loop running");
    while !cancel.load(Ordering::Relaxed) {
        if let Err(e) = run_cycle(&deps, &registry, &cancel).await {
            log::error!("Reconcile cycle failed: {}", e);
            cancellable_sleep(&cancel, config::mailwatch::error_backoff()).await;
        }
    }
    log::info!("Mail watcher loop exited");
}

/// One cycle: re-read settings, then either an IDLE session or a single
/// poll. Configuration problems idle-and-recheck, they never propagate.
async fn run_cycle(
    deps: &WatcherDeps,
    registry: &BankRegistry,
    cancel: &AtomicBool,
) -> AppResult<()> {
    let settings = {
        let conn = get_connection(&deps.pool)?;
        WatchSettings::load(&conn)
    };

    if !settings.enabled {
        cancellable_sleep(cancel, config::mailwatch::disabled_recheck()).await;
        return Ok(());
    }
    let Some(creds) = settings.credentials() else {
        log::warn!("Mail watcher enabled but mailbox credentials are unresolved");
        cancellable_sleep(cancel, config::mailwatch::disabled_recheck()).await;
        return Ok(());
    };
    let Some(parser) = registry.get(settings.bank) else {
        log::warn!("No parser registered for bank '{}'", settings.bank);
        cancellable_sleep(cancel, config::mailwatch::disabled_recheck()).await;
        return Ok(());
    };

    if settings.idle_enabled {
        if let Err(e) = idle_session(deps, parser, &settings, &creds, cancel).await {
            log::warn!("IDLE session failed ({}), falling back to a poll cycle", e);
            poll_cycle(deps, parser, &settings, &creds, cancel).await?;
            cancellable_sleep(cancel, Duration::from_secs(settings.interval_secs)).await;
        }
    } else {
        poll_cycle(deps, parser, &settings, &creds, cancel).await?;
        cancellable_sleep(cancel, Duration::from_secs(settings.interval_secs)).await;
    }
    Ok(())
}

/// One connect → backlog → IDLE session, reconnecting after `keepalive`
/// seconds to dodge server-side IDLE limits.
async fn idle_session(
    deps: &WatcherDeps,
    parser: &dyn BankParser,
    settings: &WatchSettings,
    creds: &MailCredentials,
    cancel: &AtomicBool,
) -> AppResult<()> {
    let keepalive = Duration::from_secs(settings.keepalive_secs);
    let mut session = connect_session(creds, &settings.folder).await?;

    // Backlog: anything that arrived while disconnected, plus unseen
    // match misses from earlier cycles.
    session = process_unseen(deps, parser, cancel, session).await?;

    let session_deadline = Instant::now() + keepalive;
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let remaining = session_deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let (s, outcome) = in_session(session, move |s| s.idle_wait(remaining)).await?;
        session = s;
        touch_health(deps, "last_idle_at");

        match outcome {
            IdleOutcome::NewMail => {
                session = process_unseen(deps, parser, cancel, session).await?;
            }
            IdleOutcome::Timeout => break,
        }
    }

    let _ = tokio::task::spawn_blocking(move || session.logout()).await;
    Ok(())
}

/// One poll: connect, process unseen, disconnect. The inter-poll sleep
/// belongs to the caller.
async fn poll_cycle(
    deps: &WatcherDeps,
    parser: &dyn BankParser,
    settings: &WatchSettings,
    creds: &MailCredentials,
    cancel: &AtomicBool,
) -> AppResult<()> {
    let session = connect_session(creds, &settings.folder).await?;
    let session = process_unseen(deps, parser, cancel, session).await?;
    let _ = tokio::task::spawn_blocking(move || session.logout()).await;
    touch_health(deps, "last_poll_at");
    Ok(())
}

/// Single reconcile poll, for the `poll` subcommand. Runs regardless of
/// the `enabled` flag but still needs resolvable credentials.
pub async fn poll_once(deps: &WatcherDeps) -> AppResult<()> {
    let registry = BankRegistry::default_registry();
    let settings = {
        let conn = get_connection(&deps.pool)?;
        WatchSettings::load(&conn)
    };
    let Some(creds) = settings.credentials() else {
        return Err(AppError::Config(
            "mailbox credentials are not configured".into(),
        ));
    };
    let parser = registry.get(settings.bank).ok_or_else(|| {
        AppError::Config(format!("no parser registered for bank '{}'", settings.bank))
    })?;

    let cancel = AtomicBool::new(false);
    poll_cycle(deps, parser, &settings, &creds, &cancel).await
}

/// Fetch and process every unseen message in mailbox order, strictly
/// sequentially. Messages whose outcome warrants a retry are left unseen.
async fn process_unseen(
    deps: &WatcherDeps,
    parser: &dyn BankParser,
    cancel: &AtomicBool,
    session: ImapSession,
) -> AppResult<ImapSession> {
    let (mut session, seqs) = in_session(session, |s| s.search_unseen()).await?;
    if !seqs.is_empty() {
        log::info!("Processing {} unseen message(s)", seqs.len());
    }

    for seq in seqs {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let (s, raw) = in_session(session, move |s| s.fetch(seq)).await?;
        session = s;

        let outcome = process_message(deps, parser, &raw).await;
        if outcome.should_mark_seen() {
            let (s, ()) = in_session(session, move |s| s.mark_seen(seq)).await?;
            session = s;
        }
    }
    Ok(session)
}

/// Parse → match → confirm → record for one raw email. Never fails: a
/// storage error mid-way becomes `MessageOutcome::Failed`, and the audit
/// and health trail is written for every outcome.
pub async fn process_message(
    deps: &WatcherDeps,
    parser: &dyn BankParser,
    raw: &[u8],
) -> MessageOutcome {
    let outcome = match try_process(deps, parser, raw).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("Message processing failed: {}", e);
            MessageOutcome::Failed
        }
    };
    record_outcome(deps, parser.bank(), &outcome);
    outcome
}

async fn try_process(
    deps: &WatcherDeps,
    parser: &dyn BankParser,
    raw: &[u8],
) -> AppResult<MessageOutcome> {
    let Some(body) = extract_body(raw) else {
        log::info!("Skipping message without a readable text body");
        return Ok(MessageOutcome::NotRecognized);
    };
    let Some(notification) = parser.parse(&body) else {
        log::info!(
            "Skipping message not recognized as a {} notification",
            parser.bank()
        );
        return Ok(MessageOutcome::NotRecognized);
    };
    let amount = notification.amount;
    log::info!(
        "Bank notification: {} {} (occurred at {:?})",
        amount,
        notification.bank,
        notification.occurred_at
    );

    let matched = {
        let conn = get_connection(&deps.pool)?;
        matcher::match_pending_request(&conn, amount)?
    };

    match matched {
        MatchOutcome::NoMatch => Ok(MessageOutcome::NoMatch { amount }),
        MatchOutcome::Unresolved { .. } => Ok(MessageOutcome::Unresolved { amount }),
        MatchOutcome::Matched(request) => {
            let confirmed = confirm::confirm_deposit(
                &deps.pool,
                deps.gateway.as_ref(),
                deps.notifier.as_ref(),
                deps.admin_sync.as_deref(),
                &request,
                amount,
            )
            .await?;
            Ok(match confirmed {
                ConfirmOutcome::AlreadyProcessed => MessageOutcome::AlreadyProcessed { amount },
                ConfirmOutcome::BankMarked => MessageOutcome::BankMarked { amount },
                ConfirmOutcome::GatewayFailed => MessageOutcome::GatewayFailed { amount },
                ConfirmOutcome::Completed => MessageOutcome::Completed { amount },
            })
        }
    }
}

/// Append the reconcile-log row and refresh liveness. Both writers
/// swallow their own errors; recording never destabilizes the loop.
fn record_outcome(deps: &WatcherDeps, bank: Bank, outcome: &MessageOutcome) {
    match get_connection(&deps.pool) {
        Ok(conn) => {
            if let Some((amount, matched, note)) = outcome.audit_row() {
                audit::log_attempt(&conn, bank.code(), amount, matched, note);
            }
            audit::touch_health(&conn, "last_message_at");
        }
        Err(e) => log::error!("Failed to record reconcile outcome: {}", e),
    }
}

fn touch_health(deps: &WatcherDeps, key: &str) {
    match get_connection(&deps.pool) {
        Ok(conn) => audit::touch_health(&conn, key),
        Err(e) => log::error!("Failed to touch health key '{}': {}", key, e),
    }
}

/// Run one blocking IMAP operation on the worker pool, threading the
/// session through so it survives (and is dropped, closing the socket)
/// on every path.
async fn in_session<T, F>(session: ImapSession, op: F) -> AppResult<(ImapSession, T)>
where
    F: FnOnce(&mut ImapSession) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let (session, result) = tokio::task::spawn_blocking(move || {
        let mut session = session;
        let result = op(&mut session);
        (session, result)
    })
    .await
    .map_err(|e| AppError::Mail(format!("IMAP worker panicked: {}", e)))?;
    Ok((session, result?))
}

async fn connect_session(creds: &MailCredentials, folder: &str) -> AppResult<ImapSession> {
    let host = creds.host.clone();
    let email = creds.email.clone();
    let password = creds.password.clone();
    let folder = folder.to_string();
    tokio::task::spawn_blocking(move || ImapSession::connect(&host, &email, &password, &folder))
        .await
        .map_err(|e| AppError::Mail(format!("IMAP worker panicked: {}", e)))?
}

/// Sleep in short steps so cancellation is observed promptly.
async fn cancellable_sleep(cancel: &AtomicBool, duration: Duration) {
    let step = Duration::from_millis(500);
    let mut remaining = duration;
    while !cancel.load(Ordering::Relaxed) && !remaining.is_zero() {
        let chunk = remaining.min(step);
        tokio::time::sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // ── outcome tags ─────────────────────────────────────────────────────────

    #[test]
    fn misses_and_failures_stay_unseen() {
        assert!(!MessageOutcome::NoMatch { amount: dec!(1) }.should_mark_seen());
        assert!(!MessageOutcome::Unresolved { amount: dec!(1) }.should_mark_seen());
        assert!(!MessageOutcome::Failed.should_mark_seen());
    }

    #[test]
    fn handled_messages_are_marked_seen() {
        assert!(MessageOutcome::NotRecognized.should_mark_seen());
        assert!(MessageOutcome::AlreadyProcessed { amount: dec!(1) }.should_mark_seen());
        assert!(MessageOutcome::BankMarked { amount: dec!(1) }.should_mark_seen());
        assert!(MessageOutcome::Completed { amount: dec!(1) }.should_mark_seen());
        assert!(MessageOutcome::GatewayFailed { amount: dec!(1) }.should_mark_seen());
    }

    #[test]
    fn audit_rows_carry_match_flag_and_note() {
        assert_eq!(MessageOutcome::NotRecognized.audit_row(), None);
        assert_eq!(
            MessageOutcome::NoMatch { amount: dec!(75.10) }.audit_row(),
            Some((dec!(75.10), false, "no_match"))
        );
        assert_eq!(
            MessageOutcome::Completed { amount: dec!(503.37) }.audit_row(),
            Some((dec!(503.37), true, "completed"))
        );
        assert_eq!(
            MessageOutcome::Failed.audit_row(),
            Some((Decimal::ZERO, false, "error"))
        );
    }

    // ── cancellation ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancellable_sleep_returns_early_when_cancelled() {
        let cancel = AtomicBool::new(true);
        let started = Instant::now();
        cancellable_sleep(&cancel, Duration::from_secs(30)).await;
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "a set cancel flag must short-circuit the sleep"
        );
    }
}
