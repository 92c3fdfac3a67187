//! Shared domain enums: banks we can read notifications from and
//! bookmakers we can credit.

use std::fmt;

/// Bank whose payment-notification emails we understand.
///
/// Single variant today. Adding a bank means adding a variant here and a
/// parser in `mailwatch::parser` — the connector and orchestrator stay
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    Mbank,
}

impl Bank {
    /// Wire code stored in settings and the reconcile log.
    pub fn code(&self) -> &'static str {
        match self {
            Bank::Mbank => "mbank",
        }
    }

    pub fn from_code(code: &str) -> Option<Bank> {
        match code.trim().to_lowercase().as_str() {
            "mbank" => Some(Bank::Mbank),
            _ => None,
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Bookmaker platform a deposit is credited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bookmaker {
    OneXBet,
    Melbet,
    Mostbet,
    OneWin,
}

impl Bookmaker {
    /// Code used in the ledger and by cashdesk clients.
    pub fn code(&self) -> &'static str {
        match self {
            Bookmaker::OneXBet => "1xbet",
            Bookmaker::Melbet => "melbet",
            Bookmaker::Mostbet => "mostbet",
            Bookmaker::OneWin => "1win",
        }
    }

    pub fn from_code(code: &str) -> Option<Bookmaker> {
        match code.trim().to_lowercase().as_str() {
            "1xbet" => Some(Bookmaker::OneXBet),
            "melbet" => Some(Bookmaker::Melbet),
            "mostbet" => Some(Bookmaker::Mostbet),
            "1win" => Some(Bookmaker::OneWin),
            _ => None,
        }
    }
}

impl fmt::Display for Bookmaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
