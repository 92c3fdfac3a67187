//! Matching a confirmed bank amount against pending deposit requests.
//!
//! Candidates are pending requests from the last 24 hours compared by
//! exact equality of the amount rounded to 2 decimal places; there is no
//! tolerance window. Ties between requests with the same amount are
//! broken by creation recency alone — user and bookmaker are not
//! consulted, so two users requesting an identical amount inside the
//! window can collide (see DESIGN.md).

use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::storage::profiles;
use crate::storage::requests::{self, DepositRequest};

/// How far back a pending request stays eligible for matching.
pub const MATCH_WINDOW_HOURS: i64 = 24;

#[derive(Debug)]
pub enum MatchOutcome {
    /// A candidate with a usable bookmaker account id.
    Matched(DepositRequest),
    /// No pending request carries this amount.
    NoMatch,
    /// Amount matched, but no account id could be resolved for the
    /// candidate; crediting would be a guess.
    Unresolved { request_id: i64 },
}

/// Find the single best pending request for a confirmed amount.
pub fn match_pending_request(conn: &Connection, amount: Decimal) -> rusqlite::Result<MatchOutcome> {
    let target = amount.round_dp(2);

    // Rows come back most recent first, so the first exact match is the
    // recency winner.
    let candidates = requests::pending_in_window(conn, MATCH_WINDOW_HOURS)?;
    let Some(candidate) = candidates
        .into_iter()
        .find(|r| r.amount.round_dp(2) == target)
    else {
        return Ok(MatchOutcome::NoMatch);
    };

    if !candidate.account_is_placeholder() {
        return Ok(MatchOutcome::Matched(candidate));
    }

    match profiles::saved_account_id(conn, candidate.user_id, candidate.bookmaker)? {
        Some(saved) if !saved.trim().is_empty() => {
            requests::set_account_id(conn, candidate.id, &saved)?;
            let mut resolved = candidate;
            resolved.account_id = Some(saved);
            Ok(MatchOutcome::Matched(resolved))
        }
        _ => {
            log::warn!(
                "Request {} matches amount {} but has no usable account id (user {}, {})",
                candidate.id,
                target,
                candidate.user_id,
                candidate.bookmaker
            );
            Ok(MatchOutcome::Unresolved {
                request_id: candidate.id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Bookmaker;
    use crate::storage::db::migrate_schema;
    use rusqlite::params;
    use rust_decimal_macros::dec;

    fn make_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate_schema(&conn).unwrap();
        conn
    }

    fn backdate(conn: &Connection, id: i64, modifier: &str) {
        conn.execute(
            "UPDATE deposit_requests SET created_at = datetime('now', ?1) WHERE id = ?2",
            params![modifier, id],
        )
        .unwrap();
    }

    fn add_request(conn: &Connection, user_id: i64, account: Option<&str>, amount: Decimal) -> i64 {
        requests::create_request(conn, user_id, Bookmaker::OneXBet, account, amount, None, None)
            .unwrap()
    }

    #[test]
    fn exact_amount_matches() {
        let conn = make_conn();
        let id = add_request(&conn, 1, Some("ACC-1"), dec!(503.37));

        match match_pending_request(&conn, dec!(503.37)).unwrap() {
            MatchOutcome::Matched(req) => assert_eq!(req.id, id),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn near_amount_is_no_match() {
        let conn = make_conn();
        add_request(&conn, 1, Some("ACC-1"), dec!(100.00));

        assert!(matches!(
            match_pending_request(&conn, dec!(100.01)).unwrap(),
            MatchOutcome::NoMatch
        ));
    }

    #[test]
    fn amounts_compare_rounded_to_two_places() {
        let conn = make_conn();
        let id = add_request(&conn, 1, Some("ACC-1"), dec!(100.00));

        match match_pending_request(&conn, dec!(100.004)).unwrap() {
            MatchOutcome::Matched(req) => assert_eq!(req.id, id),
            other => panic!("expected a rounded match, got {:?}", other),
        }
    }

    #[test]
    fn recency_breaks_amount_ties() {
        let conn = make_conn();
        let older = add_request(&conn, 1, Some("A"), dec!(100.00));
        let newer = add_request(&conn, 2, Some("B"), dec!(100.00));
        backdate(&conn, older, "-3600 seconds");

        match match_pending_request(&conn, dec!(100.00)).unwrap() {
            MatchOutcome::Matched(req) => assert_eq!(req.id, newer, "most recent request must win"),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn requests_outside_window_are_ignored() {
        let conn = make_conn();
        let id = add_request(&conn, 1, Some("ACC-1"), dec!(50.00));
        backdate(&conn, id, "-86401 seconds");

        assert!(matches!(
            match_pending_request(&conn, dec!(50.00)).unwrap(),
            MatchOutcome::NoMatch
        ));
    }

    #[test]
    fn placeholder_account_resolves_from_saved_profile() {
        let conn = make_conn();
        // Account equal to the raw user id is the placeholder.
        let id = add_request(&conn, 555, Some("555"), dec!(75.10));
        profiles::save_account(&conn, 555, Bookmaker::OneXBet, "real-acc-7").unwrap();

        match match_pending_request(&conn, dec!(75.10)).unwrap() {
            MatchOutcome::Matched(req) => {
                assert_eq!(req.id, id);
                assert_eq!(req.account_id.as_deref(), Some("real-acc-7"));
            }
            other => panic!("expected a resolved match, got {:?}", other),
        }

        // The resolved account is persisted on the request row.
        let stored = requests::get_request(&conn, id).unwrap().unwrap();
        assert_eq!(stored.account_id.as_deref(), Some("real-acc-7"));
    }

    #[test]
    fn placeholder_without_saved_profile_is_unresolved() {
        let conn = make_conn();
        let id = add_request(&conn, 556, None, dec!(80.00));

        match match_pending_request(&conn, dec!(80.00)).unwrap() {
            MatchOutcome::Unresolved { request_id } => assert_eq!(request_id, id),
            other => panic!("expected unresolved, got {:?}", other),
        }

        // The request itself must stay untouched for manual follow-up.
        let stored = requests::get_request(&conn, id).unwrap().unwrap();
        assert!(!stored.bank_received);
    }

    #[test]
    fn non_pending_requests_never_match() {
        let conn = make_conn();
        let id = add_request(&conn, 1, Some("ACC-1"), dec!(60.00));
        requests::mark_bank_received(&conn, id).unwrap();

        assert!(matches!(
            match_pending_request(&conn, dec!(60.00)).unwrap(),
            MatchOutcome::NoMatch
        ));
    }
}
