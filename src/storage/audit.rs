//! Reconcile audit log and watcher health records.
//!
//! Both writers swallow their own storage errors: a broken audit trail
//! must never destabilize the reconcile loop. Tables are created on
//! demand so the log works even against a database that predates them.

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

/// One reconcile attempt, appended per processed message.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub bank: String,
    pub amount: String,
    pub matched: bool,
    pub note: String,
    pub created_at: String,
}

fn ensure_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reconcile_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bank TEXT NOT NULL,
            amount TEXT NOT NULL,
            matched INTEGER NOT NULL,
            note TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_reconcile_log_bank ON reconcile_log(bank);
        CREATE INDEX IF NOT EXISTS idx_reconcile_log_created_at ON reconcile_log(created_at);

        CREATE TABLE IF NOT EXISTS health (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        );",
    )
}

/// Append one reconcile attempt. Errors are logged and dropped.
pub fn log_attempt(conn: &Connection, bank: &str, amount: Decimal, matched: bool, note: &str) {
    let result = ensure_tables(conn).and_then(|_| {
        conn.execute(
            "INSERT INTO reconcile_log (bank, amount, matched, note)
             VALUES (?1, ?2, ?3, ?4)",
            params![bank, amount.to_string(), matched as i32, note],
        )
    });
    if let Err(e) = result {
        log::error!("Failed to write reconcile log ({} {} {}): {}", bank, amount, note, e);
    }
}

/// Upsert a liveness timestamp under `key`. Errors are logged and dropped.
pub fn touch_health(conn: &Connection, key: &str) {
    let result = ensure_tables(conn).and_then(|_| {
        conn.execute(
            "INSERT INTO health (key, value, updated_at)
             VALUES (?1, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET
               value = CURRENT_TIMESTAMP,
               updated_at = CURRENT_TIMESTAMP",
            params![key],
        )
    });
    if let Err(e) = result {
        log::error!("Failed to update health key '{}': {}", key, e);
    }
}

/// Read a health value (a timestamp string), if recorded.
pub fn get_health(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    ensure_tables(conn)?;
    conn.query_row(
        "SELECT value FROM health WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

/// All health rows, for the `status` subcommand.
pub fn health_rows(conn: &Connection) -> rusqlite::Result<Vec<(String, String)>> {
    ensure_tables(conn)?;
    let mut stmt = conn.prepare("SELECT key, value FROM health ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Most recent reconcile attempts, newest first.
pub fn recent_attempts(conn: &Connection, limit: u32) -> rusqlite::Result<Vec<AuditEntry>> {
    ensure_tables(conn)?;
    let mut stmt = conn.prepare(
        "SELECT id, bank, amount, matched, note, created_at
         FROM reconcile_log
         ORDER BY id DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(AuditEntry {
            id: row.get(0)?,
            bank: row.get(1)?,
            amount: row.get(2)?,
            matched: row.get::<_, i32>(3)? != 0,
            note: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_conn() -> Connection {
        // No migration on purpose: the audit module must bootstrap its
        // own tables.
        Connection::open_in_memory().unwrap()
    }

    // ── log_attempt ──────────────────────────────────────────────────────────

    #[test]
    fn log_attempt_auto_creates_table() {
        let conn = make_conn();
        log_attempt(&conn, "mbank", dec!(75.10), false, "no_match");

        let rows = recent_attempts(&conn, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bank, "mbank");
        assert_eq!(rows[0].amount, "75.10");
        assert!(!rows[0].matched);
        assert_eq!(rows[0].note, "no_match");
    }

    #[test]
    fn log_attempt_appends_newest_first() {
        let conn = make_conn();
        log_attempt(&conn, "mbank", dec!(1), false, "no_match");
        log_attempt(&conn, "mbank", dec!(2), true, "completed");

        let rows = recent_attempts(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].note, "completed");
        assert_eq!(rows[1].note, "no_match");
    }

    #[test]
    fn log_attempt_swallows_storage_errors() {
        let conn = make_conn();
        conn.execute_batch("PRAGMA query_only = 1;").unwrap();
        // Write fails against a read-only connection; the call must not
        // panic or propagate.
        log_attempt(&conn, "mbank", dec!(10), true, "completed");
    }

    // ── health ───────────────────────────────────────────────────────────────

    #[test]
    fn touch_health_upserts() {
        let conn = make_conn();
        assert!(get_health(&conn, "last_idle_at").unwrap().is_none());

        touch_health(&conn, "last_idle_at");
        let first = get_health(&conn, "last_idle_at").unwrap().expect("must exist");

        touch_health(&conn, "last_idle_at");
        let second = get_health(&conn, "last_idle_at").unwrap().expect("must exist");
        assert!(second >= first, "timestamp must not move backwards");

        let rows = health_rows(&conn).unwrap();
        assert_eq!(rows.len(), 1, "upsert must not create duplicate keys");
    }

    #[test]
    fn touch_health_swallows_storage_errors() {
        let conn = make_conn();
        conn.execute_batch("PRAGMA query_only = 1;").unwrap();
        touch_health(&conn, "last_poll_at");
    }
}
