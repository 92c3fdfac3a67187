//! Deposit-request ledger access.
//!
//! The ledger is shared with the conversational flow (which creates
//! requests) and the receipt-upload handler (which sets
//! `receipt_received`). This module only performs single-row,
//! idempotent-guarded updates; there are no long-held locks and no
//! in-process caches of pending state.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::core::types::Bookmaker;

/// Lifecycle of a deposit request. Status only advances forward
/// (pending → bank_received → completed); `awaiting_manual` and
/// `rejected` are terminal states written by external flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositStatus {
    Pending,
    BankReceived,
    Completed,
    AwaitingManual,
    Rejected,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::BankReceived => "bank_received",
            DepositStatus::Completed => "completed",
            DepositStatus::AwaitingManual => "awaiting_manual",
            DepositStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<DepositStatus> {
        match s {
            "pending" => Some(DepositStatus::Pending),
            "bank_received" => Some(DepositStatus::BankReceived),
            "completed" => Some(DepositStatus::Completed),
            "awaiting_manual" => Some(DepositStatus::AwaitingManual),
            "rejected" => Some(DepositStatus::Rejected),
            _ => None,
        }
    }
}

/// A deposit request row from the database.
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub id: i64,
    pub user_id: i64,
    pub bookmaker: Bookmaker,
    /// Bookmaker account to credit. NULL (or a raw-user-id placeholder)
    /// until resolved.
    pub account_id: Option<String>,
    pub amount: Decimal,
    pub status: DepositStatus,
    pub bank_received: bool,
    pub bank_received_at: Option<String>,
    pub receipt_received: bool,
    pub admin_chat_id: Option<i64>,
    pub admin_message_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub processed_at: Option<String>,
}

impl DepositRequest {
    /// `created_at` parsed as UTC. The column is written by sqlite's
    /// `CURRENT_TIMESTAMP`, which is UTC `YYYY-MM-DD HH:MM:SS`.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.created_at, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|n| n.and_utc())
    }

    /// True when `account_id` is absent or is the known raw-user-id
    /// placeholder left by the conversational flow.
    pub fn account_is_placeholder(&self) -> bool {
        match &self.account_id {
            None => true,
            Some(acc) => acc.trim().is_empty() || *acc == self.user_id.to_string(),
        }
    }
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DepositRequest> {
    let bookmaker_code: String = row.get(2)?;
    let bookmaker = Bookmaker::from_code(&bookmaker_code)
        .ok_or_else(|| conversion_err(2, format!("unknown bookmaker code: {}", bookmaker_code)))?;

    let amount_text: String = row.get(4)?;
    let amount = Decimal::from_str(&amount_text)
        .map_err(|e| conversion_err(4, format!("bad amount '{}': {}", amount_text, e)))?;

    let status_text: String = row.get(5)?;
    let status = DepositStatus::parse(&status_text)
        .ok_or_else(|| conversion_err(5, format!("unknown status: {}", status_text)))?;

    Ok(DepositRequest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        bookmaker,
        account_id: row.get(3)?,
        amount,
        status,
        bank_received: row.get::<_, i32>(6)? != 0,
        bank_received_at: row.get(7)?,
        receipt_received: row.get::<_, i32>(8)? != 0,
        admin_chat_id: row.get(9)?,
        admin_message_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        processed_at: row.get(13)?,
    })
}

const SELECT_COLUMNS: &str = "id, user_id, bookmaker, account_id, amount, status, bank_received,
    bank_received_at, receipt_received, admin_chat_id, admin_message_id,
    created_at, updated_at, processed_at";

/// Create a new pending deposit request. Called by the conversational
/// flow when a user declares an intent to pay.
#[allow(clippy::too_many_arguments)]
pub fn create_request(
    conn: &Connection,
    user_id: i64,
    bookmaker: Bookmaker,
    account_id: Option<&str>,
    amount: Decimal,
    admin_chat_id: Option<i64>,
    admin_message_id: Option<i64>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO deposit_requests
             (user_id, bookmaker, account_id, amount, admin_chat_id, admin_message_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id,
            bookmaker.code(),
            account_id,
            amount.to_string(),
            admin_chat_id,
            admin_message_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get a request by ID.
pub fn get_request(conn: &Connection, id: i64) -> rusqlite::Result<Option<DepositRequest>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM deposit_requests WHERE id = ?1"),
        params![id],
        parse_row,
    )
    .optional()
}

/// All requests with `status = 'pending'` created within the last
/// `window_hours` hours, most recent first.
pub fn pending_in_window(
    conn: &Connection,
    window_hours: i64,
) -> rusqlite::Result<Vec<DepositRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM deposit_requests
         WHERE status = 'pending'
           AND created_at >= datetime('now', ?1)
         ORDER BY created_at DESC, id DESC"
    ))?;

    let modifier = format!("-{} hours", window_hours);
    let rows = stmt.query_map(params![modifier], parse_row)?;

    let mut requests = Vec::new();
    for row in rows {
        requests.push(row?);
    }
    Ok(requests)
}

/// Record that bank money arrived for this request.
///
/// Idempotent: the `bank_received = 0` guard makes the transition happen
/// exactly once per request, no matter how many times the same bank
/// notification is delivered. Returns `true` only for the call that
/// performed the transition.
pub fn mark_bank_received(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE deposit_requests
         SET bank_received = 1,
             bank_received_at = CURRENT_TIMESTAMP,
             status = CASE WHEN status = 'pending' THEN 'bank_received' ELSE status END,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?1 AND bank_received = 0",
        params![id],
    )?;
    Ok(changed == 1)
}

/// Record that the user's receipt photo arrived. Written by the external
/// receipt-upload handler; exposed here for that flow and for tests.
pub fn set_receipt_received(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE deposit_requests
         SET receipt_received = 1, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Persist a resolved bookmaker account id on the request.
pub fn set_account_id(conn: &Connection, id: i64, account_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE deposit_requests
         SET account_id = ?1, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?2",
        params![account_id, id],
    )?;
    Ok(())
}

/// Advance a bank_received request to completed. Returns `true` if the
/// row transitioned; a request that is not in `bank_received` is left
/// untouched (status never moves backward).
pub fn mark_completed(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE deposit_requests
         SET status = 'completed',
             processed_at = CURRENT_TIMESTAMP,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?1 AND status = 'bank_received'",
        params![id],
    )?;
    Ok(changed == 1)
}
