//! Store bookkeeping: connection pragmas, the commit clock, and catalog lookups.

use rusqlite::{Connection, OptionalExtension};
use std::time::Duration;

use super::value::Timestamp;

// Holds the last commit timestamp handed out for this database.
const COMMIT_CLOCK_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS _CommitClock (
    Id          INTEGER PRIMARY KEY CHECK (Id = 0),
    LastMicros  INTEGER NOT NULL
);
INSERT OR IGNORE INTO _CommitClock (Id, LastMicros) VALUES (0, 0);
"#;

/// Pragmas applied once when a database file is created.
///
/// WAL lets readers proceed while a writer holds the lock, and makes a writer
/// whose read snapshot went stale fail with `SQLITE_BUSY_SNAPSHOT`.
pub fn apply_database_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(journal_mode = %mode, "WAL unavailable; concurrent readers will block");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Pragmas applied to every pooled session.
pub fn apply_session_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Create the commit clock if it does not exist yet.
pub fn initialize_commit_clock(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(COMMIT_CLOCK_DDL)
}

/// Allocate the commit timestamp for the current write transaction.
///
/// Advancing the clock is itself a write, so it takes the database write lock.
/// Every later commit therefore observes a strictly larger value, regardless of
/// how the wall clocks of competing processes compare.
pub fn advance_commit_clock(conn: &Connection) -> rusqlite::Result<Timestamp> {
    conn.query_row(
        "UPDATE _CommitClock SET LastMicros = MAX(LastMicros + 1, ?1) WHERE Id = 0 RETURNING LastMicros",
        [crate::now_micros()],
        |row| row.get::<_, i64>(0),
    )
    .map(Timestamp::from_micros)
}

/// Primary-key columns of `table`, in key order. Empty if the table is unknown.
pub fn primary_key_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk ASC",
    )?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Whether `table` currently has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// Quote an identifier for interpolation into SQL text.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_clock_is_strictly_increasing() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_commit_clock(&conn).unwrap();

        let mut last = advance_commit_clock(&conn).unwrap();
        for _ in 0..100 {
            let next = advance_commit_clock(&conn).unwrap();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_commit_clock_never_moves_backwards() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_commit_clock(&conn).unwrap();

        // A clock value far in the future, as if another host ran ahead.
        let future = crate::now_micros() + 3_600_000_000;
        conn.execute("UPDATE _CommitClock SET LastMicros = ?1", [future])
            .unwrap();

        let next = advance_commit_clock(&conn).unwrap();
        assert_eq!(next.as_micros(), future + 1);
    }

    #[test]
    fn test_catalog_lookups() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE T (B INTEGER NOT NULL, A INTEGER NOT NULL, V TEXT, PRIMARY KEY (A, B))",
        )
        .unwrap();

        assert_eq!(primary_key_columns(&conn, "T").unwrap(), vec!["A", "B"]);
        assert!(primary_key_columns(&conn, "Missing").unwrap().is_empty());
        assert!(column_exists(&conn, "T", "V").unwrap());
        assert!(!column_exists(&conn, "T", "W").unwrap());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Albums"), "\"Albums\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
