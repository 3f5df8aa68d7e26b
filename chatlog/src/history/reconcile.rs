//! Reconciliation of delivery errors with previously sent messages.
//!
//! An outgoing message is recorded optimistically when it is sent. If the
//! server later bounces it, the error report arrives as an append carrying
//! the same correlation id. Instead of storing the report as a new row, the
//! original record is turned into an unread outgoing error in place.

use chatlog_proto::message::{AccountId, ConversationId, CorrelationId, MessageId};
use chatlog_proto::state::MessageState;

use super::events::HistoryEvent;
use super::store::Store;
use super::{HistoryError, UnitContext};

/// Error detail stored when the report carries none.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Marks the newest record with `correlation_id` as a failed send.
///
/// Returns the id of the updated record, or `None` if no record with that
/// correlation id exists. A missing record means the send was never stored;
/// the report is dropped without error.
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if the lookup or update fails.
pub fn outgoing_error(
    store: &Store,
    ctx: &UnitContext,
    account: &AccountId,
    conversation: &ConversationId,
    correlation_id: &CorrelationId,
    error: Option<&str>,
) -> Result<Option<MessageId>, HistoryError> {
    let Some(id) = store.item_id_by_correlation(account, conversation, correlation_id)? else {
        tracing::debug!(
            account = %account,
            conversation = %conversation,
            correlation_id = %correlation_id,
            "error report for unknown message dropped"
        );
        return Ok(None);
    };

    let detail = error.unwrap_or(UNKNOWN_ERROR);
    if store.mark_as_error(id, MessageState::OutgoingErrorUnread, detail)? == 0 {
        return Ok(None);
    }
    tracing::debug!(id = %id, correlation_id = %correlation_id, "outgoing message marked as failed");

    if let Some(record) = store.record(id)? {
        ctx.notifier.publish(HistoryEvent::MessageUpdated(record));
    }
    Ok(Some(id))
}
