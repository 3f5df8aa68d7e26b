//! Recording of incoming and outgoing items.
//!
//! An append runs as one serialized unit:
//!
//! 1. Error reports carrying a correlation id are reconciled with the
//!    message they refer to ([`super::reconcile`]) and never insert a row.
//! 2. Otherwise the candidate is checked against the dedup filter
//!    ([`super::dedup`]); duplicates are discarded.
//! 3. Otherwise the row is inserted, the `on_inserted` callback receives the
//!    new id and a [`HistoryEvent::MessageAdded`] is published.
//!
//! A chat state attached to the request is published even if the message is
//! discarded as a duplicate.

use chatlog_proto::chat_state::ChatState;
use chatlog_proto::message::{
    AccountId, ConversationId, CorrelationId, ItemType, MessageId, MessageRecord, Timestamp,
};
use chatlog_proto::state::{Direction, MessageState};

use super::events::HistoryEvent;
use super::store::Store;
use super::{HistoryError, UnitContext, dedup, reconcile};

/// Callback receiving the id of a newly inserted record.
///
/// Runs on the history worker: it must be quick and must not make blocking
/// history calls.
pub type OnInserted = Box<dyn FnOnce(MessageId) + Send>;

/// An item reported by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    /// Owning account.
    pub account: AccountId,
    /// Peer or room.
    pub conversation: ConversationId,
    /// Initial state; error states mark delivery error reports.
    pub state: MessageState,
    /// Author nickname (group chats).
    pub author_nickname: Option<String>,
    /// Author's real address, when known.
    pub author_id: Option<String>,
    /// Kind of item.
    pub item_type: ItemType,
    /// Origin time.
    pub timestamp: Timestamp,
    /// Protocol id of the message.
    pub correlation_id: Option<CorrelationId>,
    /// Message text.
    pub body: String,
    /// Transient chat state delivered with the item.
    pub chat_state: Option<ChatState>,
    /// Error detail for error reports.
    pub error_info: Option<String>,
}

impl AppendRequest {
    /// Creates a plain message request with no optional fields set.
    #[must_use]
    pub fn new(
        account: AccountId,
        conversation: ConversationId,
        state: MessageState,
        timestamp: Timestamp,
        body: impl Into<String>,
    ) -> Self {
        Self {
            account,
            conversation,
            state,
            author_nickname: None,
            author_id: None,
            item_type: ItemType::Message,
            timestamp,
            correlation_id: None,
            body: body.into(),
            chat_state: None,
            error_info: None,
        }
    }

    /// Sets the author nickname and, optionally, the author's real address.
    #[must_use]
    pub fn with_author(mut self, nickname: impl Into<String>, author_id: Option<String>) -> Self {
        self.author_nickname = Some(nickname.into());
        self.author_id = author_id;
        self
    }

    /// Sets the protocol correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Attaches a transient chat state.
    #[must_use]
    pub const fn with_chat_state(mut self, chat_state: ChatState) -> Self {
        self.chat_state = Some(chat_state);
        self
    }

    /// Sets the error detail of an error report.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_info = Some(error.into());
        self
    }

    /// Sets the item type.
    #[must_use]
    pub const fn with_item_type(mut self, item_type: ItemType) -> Self {
        self.item_type = item_type;
        self
    }

    /// Builds the record this request becomes once stored under `id`.
    #[must_use]
    pub fn into_record(self, id: MessageId) -> MessageRecord {
        MessageRecord {
            id,
            account: self.account,
            conversation: self.conversation,
            timestamp: self.timestamp,
            item_type: self.item_type,
            state: self.state,
            body: self.body,
            correlation_id: self.correlation_id,
            author_nickname: self.author_nickname,
            author_id: self.author_id,
            preview: None,
            error: self.error_info,
        }
    }
}

/// What an append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new record was stored.
    Inserted(MessageId),
    /// An earlier outgoing record was turned into an error record.
    Reconciled(MessageId),
    /// The item duplicated a stored record and was discarded.
    Duplicate,
    /// An error report referred to no stored message and was dropped.
    Dropped,
}

/// Applies an append request inside a serialized unit.
pub(crate) fn apply(
    store: &Store,
    ctx: &UnitContext,
    request: AppendRequest,
    on_inserted: Option<OnInserted>,
) -> Result<AppendOutcome, HistoryError> {
    if request.state.is_error()
        && let Some(correlation_id) = &request.correlation_id
    {
        let reconciled = reconcile::outgoing_error(
            store,
            ctx,
            &request.account,
            &request.conversation,
            correlation_id,
            request.error_info.as_deref(),
        )?;
        return Ok(reconciled.map_or(AppendOutcome::Dropped, AppendOutcome::Reconciled));
    }

    if dedup::is_duplicate(store, ctx.dedup, &request)? {
        tracing::debug!(
            account = %request.account,
            conversation = %request.conversation,
            direction = %request.state.direction(),
            timestamp = %request.timestamp,
            "duplicate history item discarded"
        );
        if let Some(state) = request.chat_state {
            ctx.notifier.publish(chat_state_event(&request, state));
        }
        return Ok(AppendOutcome::Duplicate);
    }

    let id = store.insert(&request)?;
    tracing::trace!(id = %id, account = %request.account, "history item stored");
    if let Some(callback) = on_inserted {
        callback(id);
    }

    // A chat state only describes the remote side.
    let chat_state = request
        .chat_state
        .filter(|_| request.state.direction() == Direction::Incoming)
        .map(|state| chat_state_event(&request, state));
    ctx.notifier
        .publish(HistoryEvent::MessageAdded(request.into_record(id)));
    if let Some(event) = chat_state {
        ctx.notifier.publish(event);
    }

    Ok(AppendOutcome::Inserted(id))
}

fn chat_state_event(request: &AppendRequest, state: ChatState) -> HistoryEvent {
    HistoryEvent::ChatStateChanged {
        account: request.account.clone(),
        conversation: request.conversation.clone(),
        state,
    }
}
