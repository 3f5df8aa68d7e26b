//! Forward-only schema migrations.
//!
//! Migration scripts are bundled with the binary and applied in order. The
//! current version lives in `PRAGMA user_version`; each script and its
//! version bump commit in one transaction, so an interrupted upgrade resumes
//! from the last completed step.

use rusqlite::Connection;

use super::HistoryError;

/// Bundled migration scripts. Index `n` upgrades version `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[
    // 1: history table
    "
    CREATE TABLE IF NOT EXISTS chat_history (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        account         TEXT NOT NULL,
        conversation    TEXT NOT NULL,
        timestamp       INTEGER NOT NULL,
        item_type       INTEGER NOT NULL,
        body            TEXT NOT NULL,
        correlation_id  TEXT,
        state           INTEGER NOT NULL,
        author_nickname TEXT,
        author_id       TEXT,
        preview         TEXT,
        error           TEXT
    );
    CREATE INDEX IF NOT EXISTS chat_history_conversation_idx
        ON chat_history (account, conversation, timestamp);
    ",
    // 2: correlation lookups for receipts and delivery errors
    "
    CREATE INDEX IF NOT EXISTS chat_history_correlation_idx
        ON chat_history (account, conversation, correlation_id);
    ",
];

/// Schema version this build expects.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn current_version() -> u32 {
    // Safe: a handful of bundled scripts.
    MIGRATIONS.len() as u32
}

/// Reads the version recorded in the database.
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if the pragma cannot be read.
pub fn version(conn: &Connection) -> Result<u32, HistoryError> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Applies every bundled migration newer than the recorded version.
///
/// Returns the resulting version. Running it on an up-to-date database is
/// a no-op.
///
/// # Errors
///
/// Returns [`HistoryError::Schema`] naming the version whose script failed.
pub fn upgrade(conn: &mut Connection) -> Result<u32, HistoryError> {
    let mut current = version(conn)?;
    let target = current_version();

    while current < target {
        let next = current + 1;
        let script = MIGRATIONS[current as usize];
        tracing::info!(from = current, to = next, "applying history schema migration");

        let tx = conn
            .transaction()
            .map_err(|source| HistoryError::Schema {
                version: next,
                source,
            })?;
        tx.execute_batch(script)
            .and_then(|()| tx.pragma_update(None, "user_version", next))
            .map_err(|source| HistoryError::Schema {
                version: next,
                source,
            })?;
        tx.commit().map_err(|source| HistoryError::Schema {
            version: next,
            source,
        })?;

        current = version(conn)?;
    }

    Ok(current)
}
