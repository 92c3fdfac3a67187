//! Two-phase deposit completion.
//!
//! A request completes only once both signals are in: bank money
//! (recorded here) and the user's receipt photo (recorded by the external
//! receipt-upload handler). Whichever arrives first only advances the
//! request part-way; the gateway call happens on the second signal.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::core::config;
use crate::core::error::AppResult;
use crate::gateway::{AdminSync, Cashdesk};
use crate::storage::requests::{self, DepositRequest};
use crate::storage::{get_connection, DbPool};
use crate::telegram::notifications::{format_operator_badge, DepositNotifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The bank leg was already recorded for this request; duplicate
    /// notification delivery, nothing changed.
    AlreadyProcessed,
    /// Bank money recorded; waiting for the user's receipt.
    BankMarked,
    /// Cashdesk call failed, timed out or was rejected. The request stays
    /// in `bank_received` for a retry.
    GatewayFailed,
    /// Deposit executed, request completed, user and operator notified.
    Completed,
}

/// Drive a matched request through the bank-received transition and, when
/// the receipt is already in, through gateway execution to completion.
pub async fn confirm_deposit(
    pool: &DbPool,
    gateway: &dyn Cashdesk,
    notifier: &dyn DepositNotifier,
    admin_sync: Option<&dyn AdminSync>,
    request: &DepositRequest,
    amount: Decimal,
) -> AppResult<ConfirmOutcome> {
    {
        let conn = get_connection(pool)?;
        if !requests::mark_bank_received(&conn, request.id)? {
            log::info!(
                "Request {}: bank money already recorded, ignoring duplicate notification",
                request.id
            );
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }
    }

    // Re-read the row: the receipt flag may have been set by the upload
    // handler after this request was loaded by the matcher.
    let fresh = {
        let conn = get_connection(pool)?;
        requests::get_request(&conn, request.id)?
            .ok_or_else(|| anyhow::anyhow!("request {} disappeared mid-confirmation", request.id))?
    };

    if !fresh.receipt_received {
        log::info!(
            "Request {}: bank money recorded, waiting for the user's receipt",
            fresh.id
        );
        return Ok(ConfirmOutcome::BankMarked);
    }

    let Some(account_id) = fresh.account_id.clone().filter(|a| !a.trim().is_empty()) else {
        log::warn!(
            "Request {}: receipt present but no account id to credit, leaving at bank_received",
            fresh.id
        );
        return Ok(ConfirmOutcome::BankMarked);
    };

    let call = gateway.deposit_execute(fresh.bookmaker, &account_id, amount);
    let outcome = match tokio::time::timeout(config::mailwatch::gateway_timeout(), call).await {
        Err(_) => {
            log::error!(
                "Request {}: cashdesk call timed out after {}s",
                fresh.id,
                config::mailwatch::GATEWAY_TIMEOUT_SECS
            );
            return Ok(ConfirmOutcome::GatewayFailed);
        }
        Ok(Err(e)) => {
            log::error!("Request {}: cashdesk call failed: {}", fresh.id, e);
            return Ok(ConfirmOutcome::GatewayFailed);
        }
        Ok(Ok(outcome)) => outcome,
    };
    if !outcome.success {
        log::error!(
            "Request {}: cashdesk rejected the deposit: {}",
            fresh.id,
            outcome.raw
        );
        return Ok(ConfirmOutcome::GatewayFailed);
    }

    {
        let conn = get_connection(pool)?;
        requests::mark_completed(&conn, fresh.id)?;
    }

    let elapsed_secs = fresh
        .created_at_utc()
        .map(|t| Utc::now().signed_duration_since(t).num_seconds().max(0))
        .unwrap_or(0);

    notifier
        .notify_deposit_completed(fresh.user_id, amount, elapsed_secs)
        .await;

    if let Some(sync) = admin_sync {
        if let Err(e) = sync.sync_completed(fresh.id).await {
            log::error!("Request {}: admin status sync failed: {}", fresh.id, e);
        }
    }

    if let (Some(chat_id), Some(message_id)) = (fresh.admin_chat_id, fresh.admin_message_id) {
        let badge = format_operator_badge(amount, elapsed_secs);
        notifier
            .edit_operator_message(chat_id, message_id, &badge)
            .await;
    }

    log::info!(
        "Request {} auto-completed: {} credited to {} in {}s",
        fresh.id,
        amount,
        fresh.bookmaker,
        elapsed_secs
    );
    Ok(ConfirmOutcome::Completed)
}
