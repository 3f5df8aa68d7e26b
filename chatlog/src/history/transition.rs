//! Read/error state changes and other in-place record updates.

use chatlog_proto::message::{AccountId, ConversationId, MessageId, Preview};
use chatlog_proto::state::MessageState;

use super::events::HistoryEvent;
use super::store::Store;
use super::{HistoryError, ItemRef, UnitContext};

/// Applies an explicit state change to one record.
///
/// When `from` is supplied the change only happens if the stored state still
/// equals it. Transitions that [`MessageState::can_transition_to`] rejects are
/// no-ops. Returns the number of affected records (0 or 1).
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if a lookup or the update fails.
pub fn update_state(
    store: &Store,
    ctx: &UnitContext,
    account: &AccountId,
    conversation: &ConversationId,
    item: &ItemRef,
    from: Option<MessageState>,
    to: MessageState,
) -> Result<usize, HistoryError> {
    let Some(id) = resolve(store, account, conversation, item)? else {
        tracing::debug!(account = %account, conversation = %conversation, ?item, "state change for unknown item");
        return Ok(0);
    };
    let Some(current) = store.record(id)?.map(|record| record.state) else {
        return Ok(0);
    };
    let prior = from.unwrap_or(current);
    if !prior.can_transition_to(to) {
        tracing::debug!(id = %id, from = %prior, to = %to, "illegal state transition ignored");
        return Ok(0);
    }

    let affected = store.update_state(account, conversation, id, from, to)?;
    if affected == 0 {
        tracing::debug!(id = %id, expected = ?from, "stored state changed, transition skipped");
        return Ok(0);
    }
    publish_updated(store, ctx, id)?;
    Ok(affected)
}

/// Marks every unread record of a conversation as read.
///
/// Publishes a single [`HistoryEvent::MessagesMarkedRead`] if anything
/// changed.
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if the update fails.
pub fn mark_as_read(
    store: &Store,
    ctx: &UnitContext,
    account: &AccountId,
    conversation: &ConversationId,
) -> Result<usize, HistoryError> {
    let affected = store.mark_as_read(account, conversation)?;
    tracing::debug!(account = %account, conversation = %conversation, affected, "marked as read");
    if affected > 0 {
        ctx.notifier.publish(HistoryEvent::MessagesMarkedRead {
            account: account.clone(),
            conversation: conversation.clone(),
        });
    }
    Ok(affected)
}

/// Attaches a preview to a record. `None` leaves the stored preview alone.
///
/// # Errors
///
/// Returns [`HistoryError::Preview`] or [`HistoryError::Store`].
pub fn update_preview(
    store: &Store,
    ctx: &UnitContext,
    account: &AccountId,
    conversation: &ConversationId,
    id: MessageId,
    preview: Option<&Preview>,
) -> Result<usize, HistoryError> {
    let affected = store.update_preview(account, conversation, id, preview)?;
    if affected > 0 {
        publish_updated(store, ctx, id)?;
    }
    Ok(affected)
}

/// Erases history of one conversation, or of every conversation of the
/// account.
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if the delete fails.
pub fn remove(
    store: &Store,
    ctx: &UnitContext,
    account: &AccountId,
    conversation: Option<&ConversationId>,
) -> Result<usize, HistoryError> {
    let affected = store.remove(account, conversation)?;
    tracing::info!(account = %account, conversation = ?conversation.map(ConversationId::as_str), affected, "history removed");
    if affected > 0 {
        ctx.notifier.publish(HistoryEvent::HistoryRemoved {
            account: account.clone(),
            conversation: conversation.cloned(),
        });
    }
    Ok(affected)
}

fn resolve(
    store: &Store,
    account: &AccountId,
    conversation: &ConversationId,
    item: &ItemRef,
) -> Result<Option<MessageId>, HistoryError> {
    match item {
        ItemRef::Id(id) => Ok(Some(*id)),
        ItemRef::Correlation(correlation_id) => {
            store.item_id_by_correlation(account, conversation, correlation_id)
        }
    }
}

fn publish_updated(store: &Store, ctx: &UnitContext, id: MessageId) -> Result<(), HistoryError> {
    if let Some(record) = store.record(id)? {
        ctx.notifier.publish(HistoryEvent::MessageUpdated(record));
    }
    Ok(())
}
