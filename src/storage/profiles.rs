//! Saved bookmaker accounts per user.
//!
//! The conversational flow stores the account id a user last deposited
//! to; the matcher falls back to it when a request carries only the
//! raw-user-id placeholder.

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::types::Bookmaker;

/// Upsert the saved account id for `(user_id, bookmaker)`.
pub fn save_account(
    conn: &Connection,
    user_id: i64,
    bookmaker: Bookmaker,
    account_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO saved_accounts (user_id, bookmaker, account_id, updated_at)
         VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
         ON CONFLICT(user_id, bookmaker) DO UPDATE SET
           account_id = ?3,
           updated_at = CURRENT_TIMESTAMP",
        params![user_id, bookmaker.code(), account_id],
    )?;
    Ok(())
}

/// Saved account id for `(user_id, bookmaker)`, if any.
pub fn saved_account_id(
    conn: &Connection,
    user_id: i64,
    bookmaker: Bookmaker,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT account_id FROM saved_accounts WHERE user_id = ?1 AND bookmaker = ?2",
        params![user_id, bookmaker.code()],
        |row| row.get(0),
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::migrate_schema;

    fn make_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn save_and_read_back() {
        let conn = make_conn();
        save_account(&conn, 10, Bookmaker::OneXBet, "X-123").unwrap();

        assert_eq!(
            saved_account_id(&conn, 10, Bookmaker::OneXBet).unwrap().as_deref(),
            Some("X-123")
        );
        assert!(saved_account_id(&conn, 10, Bookmaker::Melbet).unwrap().is_none());
        assert!(saved_account_id(&conn, 11, Bookmaker::OneXBet).unwrap().is_none());
    }

    #[test]
    fn save_overwrites_previous_value() {
        let conn = make_conn();
        save_account(&conn, 10, Bookmaker::OneWin, "old").unwrap();
        save_account(&conn, 10, Bookmaker::OneWin, "new").unwrap();

        assert_eq!(
            saved_account_id(&conn, 10, Bookmaker::OneWin).unwrap().as_deref(),
            Some("new")
        );
    }
}
