//! Seams to the bookmaker cashdesk and the admin mirror.
//!
//! The real HTTP signing clients (1xbet / Melbet / Mostbet / 1win) live
//! outside this crate; the reconcile core only depends on these traits.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::core::types::Bookmaker;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cashdesk request failed: {0}")]
    Request(String),
    #[error("cashdesk rejected the deposit: {0}")]
    Rejected(String),
}

/// Result of a deposit-execute call against a bookmaker cashdesk.
#[derive(Debug, Clone)]
pub struct DepositOutcome {
    pub success: bool,
    /// Raw cashdesk response, kept for operator debugging.
    pub raw: JsonValue,
}

/// Bookmaker cashdesk: executes the actual balance credit.
#[async_trait]
pub trait Cashdesk: Send + Sync {
    async fn deposit_execute(
        &self,
        bookmaker: Bookmaker,
        account_id: &str,
        amount: Decimal,
    ) -> Result<DepositOutcome, GatewayError>;
}

/// Best-effort mirror of completed statuses into the admin backend.
#[async_trait]
pub trait AdminSync: Send + Sync {
    async fn sync_completed(&self, request_id: i64) -> Result<(), GatewayError>;
}

/// Placeholder cashdesk used until a real bookmaker client is wired in.
///
/// Always reports failure, so matched deposits stop at `bank_received`
/// and remain visible to the operator for manual completion.
pub struct ManualCashdesk;

#[async_trait]
impl Cashdesk for ManualCashdesk {
    async fn deposit_execute(
        &self,
        bookmaker: Bookmaker,
        account_id: &str,
        amount: Decimal,
    ) -> Result<DepositOutcome, GatewayError> {
        log::info!(
            "Manual cashdesk: deposit of {} to {} account {} left for operator completion",
            amount,
            bookmaker,
            account_id
        );
        Ok(DepositOutcome {
            success: false,
            raw: serde_json::json!({ "mode": "manual" }),
        })
    }
}
