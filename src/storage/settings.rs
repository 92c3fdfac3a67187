//! Persisted key/value settings and payment requisites.
//!
//! Settings are read by the watcher every cycle, so operators can toggle
//! the mailbox listener without restarting the bot. The active requisite
//! is the bank card users are told to pay to; its row also carries the
//! credentials of the mailbox that receives that bank's notifications,
//! used as the last-resort credential fallback.

use rusqlite::{params, Connection, OptionalExtension};

/// Read a persisted setting.
pub fn get_setting(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

/// Upsert a persisted setting.
pub fn set_setting(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at)
         VALUES (?1, ?2, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET
           value = ?2,
           updated_at = CURRENT_TIMESTAMP",
        params![key, value],
    )?;
    Ok(())
}

/// A payment requisite row.
#[derive(Debug, Clone)]
pub struct Requisite {
    pub id: i64,
    pub bank: String,
    pub card_number: String,
    pub holder: String,
    pub email: Option<String>,
    pub email_password: Option<String>,
    pub imap_host: Option<String>,
    pub is_active: bool,
}

fn parse_requisite(row: &rusqlite::Row<'_>) -> rusqlite::Result<Requisite> {
    Ok(Requisite {
        id: row.get(0)?,
        bank: row.get(1)?,
        card_number: row.get(2)?,
        holder: row.get(3)?,
        email: row.get(4)?,
        email_password: row.get(5)?,
        imap_host: row.get(6)?,
        is_active: row.get::<_, i32>(7)? != 0,
    })
}

/// Insert a requisite. New requisites start inactive.
pub fn add_requisite(
    conn: &Connection,
    bank: &str,
    card_number: &str,
    holder: &str,
    email: Option<&str>,
    email_password: Option<&str>,
    imap_host: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO requisites (bank, card_number, holder, email, email_password, imap_host)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![bank, card_number, holder, email, email_password, imap_host],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Make one requisite the active one for its bank, deactivating the rest.
pub fn set_active_requisite(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE requisites SET is_active = 0
         WHERE bank = (SELECT bank FROM requisites WHERE id = ?1)",
        params![id],
    )?;
    conn.execute("UPDATE requisites SET is_active = 1 WHERE id = ?1", params![id])?;
    Ok(())
}

/// The active requisite for a bank, if any. When several rows are marked
/// active (should not happen), the newest wins.
pub fn active_requisite(conn: &Connection, bank: &str) -> rusqlite::Result<Option<Requisite>> {
    conn.query_row(
        "SELECT id, bank, card_number, holder, email, email_password, imap_host, is_active
         FROM requisites
         WHERE bank = ?1 AND is_active = 1
         ORDER BY id DESC
         LIMIT 1",
        params![bank],
        parse_requisite,
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

    // ── settings ─────────────────────────────────────────────────────────────

    #[test]
    fn setting_missing_returns_none() {
        let conn = make_conn();
        assert!(get_setting(&conn, "mailwatch_enabled").unwrap().is_none());
    }

    #[test]
    fn setting_upsert_overwrites() {
        let conn = make_conn();
        set_setting(&conn, "mailwatch_enabled", "true").unwrap();
        set_setting(&conn, "mailwatch_enabled", "false").unwrap();
        assert_eq!(
            get_setting(&conn, "mailwatch_enabled").unwrap().as_deref(),
            Some("false")
        );
    }

    // ── requisites ───────────────────────────────────────────────────────────

    #[test]
    fn no_active_requisite_returns_none() {
        let conn = make_conn();
        add_requisite(&conn, "mbank", "4177 49** **** 0001", "A. B.", None, None, None).unwrap();
        assert!(active_requisite(&conn, "mbank").unwrap().is_none());
    }

    #[test]
    fn set_active_switches_within_bank() {
        let conn = make_conn();
        let first = add_requisite(
            &conn,
            "mbank",
            "4177 49** **** 0001",
            "A. B.",
            Some("pay1@example.com"),
            Some("secret1"),
            Some("imap.example.com"),
        )
        .unwrap();
        let second = add_requisite(
            &conn,
            "mbank",
            "4177 49** **** 0002",
            "C. D.",
            Some("pay2@example.com"),
            Some("secret2"),
            Some("imap.example.com"),
        )
        .unwrap();

        set_active_requisite(&conn, first).unwrap();
        set_active_requisite(&conn, second).unwrap();

        let active = active_requisite(&conn, "mbank").unwrap().expect("must exist");
        assert_eq!(active.id, second);
        assert_eq!(active.email.as_deref(), Some("pay2@example.com"));

        let actives: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM requisites WHERE bank = 'mbank' AND is_active = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(actives, 1, "only one requisite per bank may be active");
    }
}
