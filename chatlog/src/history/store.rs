//! Relational access to the `chat_history` table.
//!
//! Every statement is parameterized; no caller-supplied value is ever
//! spliced into SQL text. The [`Store`] is not thread-safe on its own: it is
//! owned by the history worker (see [`super::dispatcher`]) and only ever
//! touched from inside a serialized unit.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use chatlog_proto::message::{
    AccountId, ConversationId, CorrelationId, ItemType, MessageId, MessageRecord, Preview,
    Timestamp,
};
use chatlog_proto::state::{Direction, MessageState};

use super::append::AppendRequest;
use super::{HistoryError, schema};

const RECORD_COLUMNS: &str = "id, account, conversation, timestamp, item_type, body, \
     correlation_id, state, author_nickname, author_id, preview, error";

/// An `item_type` value this build does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown item type {0}")]
struct UnknownItemType(i64);

/// Identity fields a duplicate must share with an incoming candidate.
#[derive(Debug)]
pub struct DuplicateQuery<'a> {
    /// Owning account.
    pub account: &'a AccountId,
    /// Peer or room.
    pub conversation: &'a ConversationId,
    /// Candidate item type.
    pub item_type: ItemType,
    /// Candidate body, compared exactly.
    pub body: &'a str,
    /// Candidate direction, compared against the state parity.
    pub direction: Direction,
    /// Candidate author nickname; `None` only matches records without one.
    pub author_nickname: Option<&'a str>,
    /// Candidate correlation id; stored records must have none or the same.
    pub correlation_id: Option<&'a CorrelationId>,
    /// Inclusive lower bound of the time window.
    pub from: Timestamp,
    /// Inclusive upper bound of the time window.
    pub to: Timestamp,
}

/// Handle to the history database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (or creates) the database at `path` and brings its schema up
    /// to date.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the file cannot be opened or a migration
    /// fails.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database with the current schema.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, HistoryError> {
        let version = schema::upgrade(&mut conn)?;
        tracing::debug!(version, "history store ready");
        Ok(Self { conn })
    }

    /// Schema version recorded in the database.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the version cannot be read.
    pub fn schema_version(&self) -> Result<u32, HistoryError> {
        schema::version(&self.conn)
    }

    /// Inserts a new record and returns its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the insert fails.
    pub fn insert(&self, request: &AppendRequest) -> Result<MessageId, HistoryError> {
        self.conn.execute(
            "INSERT INTO chat_history (account, conversation, timestamp, item_type, body, \
             correlation_id, state, author_nickname, author_id, error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                request.account.as_str(),
                request.conversation.as_str(),
                to_sql_millis(request.timestamp)?,
                request.item_type.ordinal(),
                request.body,
                request.correlation_id.as_ref().map(CorrelationId::as_str),
                request.state.ordinal(),
                request.author_nickname,
                request.author_id,
                request.error_info,
            ],
        )?;
        Ok(MessageId::from_raw(self.conn.last_insert_rowid()))
    }

    /// Counts stored records matching a duplicate query.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the query fails.
    pub fn count_duplicates(&self, query: &DuplicateQuery<'_>) -> Result<i64, HistoryError> {
        let count = self.conn.query_row(
            "SELECT count(id) FROM chat_history \
             WHERE account = ?1 AND conversation = ?2 AND item_type = ?3 AND body = ?4 \
             AND timestamp BETWEEN ?5 AND ?6 \
             AND (state % 2) = ?7 \
             AND author_nickname IS ?8 \
             AND (?9 IS NULL OR correlation_id IS NULL OR correlation_id = ?9)",
            params![
                query.account.as_str(),
                query.conversation.as_str(),
                query.item_type.ordinal(),
                query.body,
                bound_millis(query.from),
                bound_millis(query.to),
                query.direction.ordinal(),
                query.author_nickname,
                query.correlation_id.map(CorrelationId::as_str),
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Finds the newest record carrying `correlation_id` in a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the query fails.
    pub fn item_id_by_correlation(
        &self,
        account: &AccountId,
        conversation: &ConversationId,
        correlation_id: &CorrelationId,
    ) -> Result<Option<MessageId>, HistoryError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM chat_history \
                 WHERE account = ?1 AND conversation = ?2 AND correlation_id = ?3 \
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![
                    account.as_str(),
                    conversation.as_str(),
                    correlation_id.as_str()
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(MessageId::from_raw))
    }

    /// Timestamp of a record, if it exists in the given conversation.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the query fails.
    pub fn timestamp_of(
        &self,
        account: &AccountId,
        conversation: &ConversationId,
        id: MessageId,
    ) -> Result<Option<Timestamp>, HistoryError> {
        let millis: Option<i64> = self
            .conn
            .query_row(
                "SELECT timestamp FROM chat_history \
                 WHERE id = ?1 AND account = ?2 AND conversation = ?3",
                params![id.as_raw(), account.as_str(), conversation.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        millis
            .map(|millis| from_sql_millis(0, millis))
            .transpose()
            .map_err(Into::into)
    }

    /// Counts records that sort at or ahead of `(timestamp, id)` in the
    /// newest-first history order.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the query fails.
    pub fn count_ahead_of(
        &self,
        account: &AccountId,
        conversation: &ConversationId,
        timestamp: Timestamp,
        id: MessageId,
    ) -> Result<i64, HistoryError> {
        let count = self.conn.query_row(
            "SELECT count(id) FROM chat_history \
             WHERE account = ?1 AND conversation = ?2 \
             AND (timestamp > ?3 OR (timestamp = ?3 AND id >= ?4))",
            params![
                account.as_str(),
                conversation.as_str(),
                to_sql_millis(timestamp)?,
                id.as_raw()
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Reads a page of history, newest first; equal timestamps are ordered
    /// by descending id so that paging is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the query fails or a row holds
    /// an unknown state or item type.
    pub fn rows(
        &self,
        account: &AccountId,
        conversation: &ConversationId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, HistoryError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM chat_history \
             WHERE account = ?1 AND conversation = ?2 \
             ORDER BY timestamp DESC, id DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![account.as_str(), conversation.as_str(), limit, offset],
            record_from_row,
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Loads a single record by id.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the query fails.
    pub fn record(&self, id: MessageId) -> Result<Option<MessageRecord>, HistoryError> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM chat_history WHERE id = ?1"),
                params![id.as_raw()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Sets the state of a record, optionally only if it currently is `from`.
    ///
    /// Returns the number of affected rows (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the update fails.
    pub fn update_state(
        &self,
        account: &AccountId,
        conversation: &ConversationId,
        id: MessageId,
        from: Option<MessageState>,
        to: MessageState,
    ) -> Result<usize, HistoryError> {
        let affected = self.conn.execute(
            "UPDATE chat_history SET state = ?5 \
             WHERE id = ?1 AND account = ?2 AND conversation = ?3 \
             AND (?4 IS NULL OR state = ?4)",
            params![
                id.as_raw(),
                account.as_str(),
                conversation.as_str(),
                from.map(MessageState::ordinal),
                to.ordinal(),
            ],
        )?;
        Ok(affected)
    }

    /// Turns a record into an error record carrying `error`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the update fails.
    pub fn mark_as_error(
        &self,
        id: MessageId,
        state: MessageState,
        error: &str,
    ) -> Result<usize, HistoryError> {
        let affected = self.conn.execute(
            "UPDATE chat_history SET state = ?2, error = ?3 WHERE id = ?1",
            params![id.as_raw(), state.ordinal(), error],
        )?;
        Ok(affected)
    }

    /// Moves every unread record of a conversation to its read counterpart
    /// in a single statement.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the update fails.
    pub fn mark_as_read(
        &self,
        account: &AccountId,
        conversation: &ConversationId,
    ) -> Result<usize, HistoryError> {
        let [a, b, c] = MessageState::unread_states();
        let affected = self.conn.execute(
            "UPDATE chat_history \
             SET state = CASE state WHEN ?3 THEN ?4 WHEN ?5 THEN ?6 WHEN ?7 THEN ?8 ELSE state END \
             WHERE account = ?1 AND conversation = ?2 AND state IN (?3, ?5, ?7)",
            params![
                account.as_str(),
                conversation.as_str(),
                a.ordinal(),
                a.read().ordinal(),
                b.ordinal(),
                b.read().ordinal(),
                c.ordinal(),
                c.read().ordinal(),
            ],
        )?;
        Ok(affected)
    }

    /// Attaches a preview to a record; `None` keeps whatever is stored.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Preview`] if the preview cannot be encoded,
    /// or [`HistoryError::Store`] if the update fails.
    pub fn update_preview(
        &self,
        account: &AccountId,
        conversation: &ConversationId,
        id: MessageId,
        preview: Option<&Preview>,
    ) -> Result<usize, HistoryError> {
        let encoded = preview.map(serde_json::to_string).transpose()?;
        let affected = self.conn.execute(
            "UPDATE chat_history SET preview = coalesce(?4, preview) \
             WHERE id = ?1 AND account = ?2 AND conversation = ?3",
            params![id.as_raw(), account.as_str(), conversation.as_str(), encoded],
        )?;
        Ok(affected)
    }

    /// Deletes the history of one conversation, or of the whole account when
    /// `conversation` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Store`] if the delete fails.
    pub fn remove(
        &self,
        account: &AccountId,
        conversation: Option<&ConversationId>,
    ) -> Result<usize, HistoryError> {
        let affected = self.conn.execute(
            "DELETE FROM chat_history WHERE account = ?1 AND (?2 IS NULL OR conversation = ?2)",
            params![account.as_str(), conversation.map(ConversationId::as_str)],
        )?;
        Ok(affected)
    }
}

/// Stored timestamps are SQLite integers, so only `0..=i64::MAX` fits.
fn to_sql_millis(ts: Timestamp) -> rusqlite::Result<i64> {
    i64::try_from(ts.as_millis())
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Range bound for a timestamp comparison; no stored value lies past `i64::MAX`.
fn bound_millis(ts: Timestamp) -> i64 {
    i64::try_from(ts.as_millis()).unwrap_or(i64::MAX)
}

fn from_sql_millis(idx: usize, millis: i64) -> rusqlite::Result<Timestamp> {
    u64::try_from(millis)
        .map(Timestamp::from_millis)
        .map_err(|e| conversion_error(idx, Type::Integer, e))
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let item_type: i64 = row.get(4)?;
    let state: i64 = row.get(7)?;
    let preview: Option<String> = row.get(10)?;

    Ok(MessageRecord {
        id: MessageId::from_raw(row.get(0)?),
        account: AccountId::new(row.get::<_, String>(1)?),
        conversation: ConversationId::new(row.get::<_, String>(2)?),
        timestamp: from_sql_millis(3, row.get(3)?)?,
        item_type: ItemType::from_ordinal(item_type)
            .ok_or_else(|| conversion_error(4, Type::Integer, UnknownItemType(item_type)))?,
        body: row.get(5)?,
        correlation_id: row.get::<_, Option<String>>(6)?.map(CorrelationId::new),
        state: MessageState::from_ordinal(state)
            .map_err(|e| conversion_error(7, Type::Integer, e))?,
        author_nickname: row.get(8)?,
        author_id: row.get(9)?,
        preview: preview
            .map(|text| serde_json::from_str::<Preview>(&text))
            .transpose()
            .map_err(|e| conversion_error(10, Type::Text, e))?,
        error: row.get(11)?,
    })
}
