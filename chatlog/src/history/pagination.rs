//! Anchored paging over a conversation's history.
//!
//! Readers scroll backwards by passing the oldest id they already show as
//! the anchor. The offset is recomputed from the anchor on every request, so
//! records appended meanwhile (which sort ahead of it) shift neither the
//! anchor nor the rows that follow it.

use chatlog_proto::message::{AccountId, ConversationId, MessageId, MessageRecord};

use super::HistoryError;
use super::store::Store;

/// Number of rows that sort at or ahead of `anchor`, i.e. the offset of the
/// first row strictly older than it.
///
/// An anchor that is absent from the conversation counts as no anchor.
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if a query fails.
pub fn offset_for(
    store: &Store,
    account: &AccountId,
    conversation: &ConversationId,
    anchor: Option<MessageId>,
) -> Result<i64, HistoryError> {
    let Some(anchor) = anchor else {
        return Ok(0);
    };
    let Some(timestamp) = store.timestamp_of(account, conversation, anchor)? else {
        tracing::debug!(anchor = %anchor, conversation = %conversation, "page anchor not found, paging from newest");
        return Ok(0);
    };
    store.count_ahead_of(account, conversation, timestamp, anchor)
}

/// Up to `limit` records older than `before` (or the newest ones when no
/// anchor is given), newest first.
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if a query fails.
pub fn page(
    store: &Store,
    account: &AccountId,
    conversation: &ConversationId,
    before: Option<MessageId>,
    limit: usize,
) -> Result<Vec<MessageRecord>, HistoryError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let offset = offset_for(store, account, conversation, before)?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    store.rows(account, conversation, limit, offset)
}
