//! Message history persistence and synchronization.
//!
//! [`ChatHistory`] is the single authority over a history database. Every
//! operation becomes a unit on the [`Dispatcher`](dispatcher::Dispatcher)
//! worker, so appends, state changes and reads are totally ordered no matter
//! which thread issues them. Changes are announced through the
//! [`EventNotifier`](events::EventNotifier).
//!
//! Mutations come in two flavours: fire-and-forget (`append_item`,
//! `mark_as_read`, ...) for network callbacks that must not block, and
//! `*_sync` variants that wait for the result. Reads are offered blocking,
//! callback-delivered and awaitable.

pub mod append;
pub mod dedup;
pub mod dispatcher;
pub mod events;
pub mod pagination;
pub mod reconcile;
pub mod schema;
pub mod store;
pub mod transition;

use std::path::Path;
use std::sync::Arc;

use chatlog_proto::chat_state::ChatState;
use chatlog_proto::message::{
    AccountId, ConversationId, CorrelationId, MessageId, MessageRecord, Preview,
};
use chatlog_proto::state::MessageState;

use append::{AppendOutcome, AppendRequest, OnInserted};
use dedup::DedupWindows;
use dispatcher::Dispatcher;
use events::{EventKind, EventNotifier, HistoryEvent, Subscription};
use store::Store;

/// Errors raised by the history engine.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The database rejected a statement.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A preview could not be encoded or decoded.
    #[error("preview encoding failed: {0}")]
    Preview(#[from] serde_json::Error),

    /// A migration script failed.
    #[error("schema upgrade to version {version} failed: {source}")]
    Schema {
        /// Version the failing script would have produced.
        version: u32,
        /// Underlying database error.
        source: rusqlite::Error,
    },

    /// A blocking call was made from inside a history unit.
    #[error("blocking history call from inside a history unit")]
    Reentrant,

    /// The history worker has been shut down.
    #[error("history worker is not running")]
    WorkerUnavailable,

    /// The unit panicked before producing a result.
    #[error("history unit panicked")]
    UnitPanicked,

    /// The worker thread could not be started.
    #[error("failed to start history worker: {0}")]
    Spawn(std::io::Error),
}

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tunables of a [`ChatHistory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySettings {
    /// Dedup window half-widths.
    pub dedup: DedupWindows,
    /// Events buffered per subscriber before a slow one starts skipping.
    pub event_buffer: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            dedup: DedupWindows::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// What a unit needs besides the store.
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// Where the unit publishes its events.
    pub notifier: EventNotifier,
    /// Dedup windows for appends.
    pub dedup: DedupWindows,
}

/// Reference to a stored item, by row id or by protocol correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    /// Store-assigned id.
    Id(MessageId),
    /// Newest record carrying this correlation id.
    Correlation(CorrelationId),
}

impl From<MessageId> for ItemRef {
    fn from(id: MessageId) -> Self {
        Self::Id(id)
    }
}

impl From<CorrelationId> for ItemRef {
    fn from(id: CorrelationId) -> Self {
        Self::Correlation(id)
    }
}

/// Handle to a history database.
///
/// Cheap to clone; all clones share one worker. The worker stops when the
/// last clone is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct ChatHistory {
    dispatcher: Arc<Dispatcher>,
    ctx: UnitContext,
}

impl std::fmt::Debug for ChatHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHistory")
            .field("dedup", &self.ctx.dedup)
            .finish_non_exhaustive()
    }
}

impl ChatHistory {
    /// Opens the database at `path`, upgrading its schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the database cannot be opened or
    /// upgraded, or the worker cannot be started.
    pub fn open(path: &Path, settings: HistorySettings) -> Result<Self, HistoryError> {
        tracing::info!(path = %path.display(), "opening chat history");
        Self::with_store(Store::open(path)?, settings)
    }

    /// Creates a history backed by a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the schema cannot be created or the
    /// worker cannot be started.
    pub fn in_memory(settings: HistorySettings) -> Result<Self, HistoryError> {
        Self::with_store(Store::open_in_memory()?, settings)
    }

    /// Wraps an already opened store.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Spawn`] if the worker cannot be started.
    pub fn with_store(store: Store, settings: HistorySettings) -> Result<Self, HistoryError> {
        Ok(Self {
            dispatcher: Arc::new(Dispatcher::spawn(store)?),
            ctx: UnitContext {
                notifier: EventNotifier::new(settings.event_buffer),
                dedup: settings.dedup,
            },
        })
    }

    // --- Appends ---

    /// Records an item without waiting.
    ///
    /// `on_inserted` runs on the worker with the new id, only if a row was
    /// actually inserted (not for duplicates or reconciled error reports).
    pub fn append_item(&self, request: AppendRequest, on_inserted: Option<OnInserted>) {
        let ctx = self.ctx.clone();
        self.dispatcher.submit("append_item", move |store| {
            append::apply(store, &ctx, request, on_inserted).map(|_| ())
        });
    }

    /// Records an item and reports what happened.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the unit fails or cannot run.
    pub fn append_item_sync(&self, request: AppendRequest) -> Result<AppendOutcome, HistoryError> {
        let ctx = self.ctx.clone();
        self.dispatcher
            .submit_sync(move |store| append::apply(store, &ctx, request, None))
    }

    /// Records an item from async code.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the unit fails or cannot run.
    pub async fn append_item_async(
        &self,
        request: AppendRequest,
    ) -> Result<AppendOutcome, HistoryError> {
        let ctx = self.ctx.clone();
        self.dispatcher
            .submit_async(move |store| append::apply(store, &ctx, request, None))
            .await
    }

    // --- State changes ---

    /// Changes the state of one item without waiting.
    ///
    /// With `from` supplied, the change only applies if the stored state
    /// still equals it. Edges rejected by [`MessageState::can_transition_to`]
    /// (e.g. read back to unread) affect nothing and publish no event.
    pub fn update_item_state(
        &self,
        account: AccountId,
        conversation: ConversationId,
        item: ItemRef,
        from: Option<MessageState>,
        to: MessageState,
    ) {
        let ctx = self.ctx.clone();
        self.dispatcher.submit("update_item_state", move |store| {
            transition::update_state(store, &ctx, &account, &conversation, &item, from, to)
                .map(|_| ())
        });
    }

    /// Changes the state of one item and returns the affected count.
    ///
    /// An edge rejected by [`MessageState::can_transition_to`] returns 0.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the unit fails or cannot run.
    pub fn update_item_state_sync(
        &self,
        account: AccountId,
        conversation: ConversationId,
        item: ItemRef,
        from: Option<MessageState>,
        to: MessageState,
    ) -> Result<usize, HistoryError> {
        let ctx = self.ctx.clone();
        self.dispatcher.submit_sync(move |store| {
            transition::update_state(store, &ctx, &account, &conversation, &item, from, to)
        })
    }

    /// Attaches a preview to an item without waiting. `None` keeps the
    /// stored preview.
    pub fn update_item(
        &self,
        account: AccountId,
        conversation: ConversationId,
        id: MessageId,
        preview: Option<Preview>,
    ) {
        let ctx = self.ctx.clone();
        self.dispatcher.submit("update_item", move |store| {
            transition::update_preview(store, &ctx, &account, &conversation, id, preview.as_ref())
                .map(|_| ())
        });
    }

    /// Attaches a preview and returns the affected count.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the unit fails or cannot run.
    pub fn update_item_sync(
        &self,
        account: AccountId,
        conversation: ConversationId,
        id: MessageId,
        preview: Option<Preview>,
    ) -> Result<usize, HistoryError> {
        let ctx = self.ctx.clone();
        self.dispatcher.submit_sync(move |store| {
            transition::update_preview(store, &ctx, &account, &conversation, id, preview.as_ref())
        })
    }

    /// Marks every unread item of a conversation as read, without waiting.
    pub fn mark_as_read(&self, account: AccountId, conversation: ConversationId) {
        let ctx = self.ctx.clone();
        self.dispatcher.submit("mark_as_read", move |store| {
            transition::mark_as_read(store, &ctx, &account, &conversation).map(|_| ())
        });
    }

    /// Marks every unread item of a conversation as read and returns the
    /// number of changed items.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the unit fails or cannot run.
    pub fn mark_as_read_sync(
        &self,
        account: AccountId,
        conversation: ConversationId,
    ) -> Result<usize, HistoryError> {
        let ctx = self.ctx.clone();
        self.dispatcher.submit_sync(move |store| {
            transition::mark_as_read(store, &ctx, &account, &conversation)
        })
    }

    /// Erases the history of one conversation, or of the whole account when
    /// `conversation` is `None`, without waiting.
    pub fn remove_history(&self, account: AccountId, conversation: Option<ConversationId>) {
        let ctx = self.ctx.clone();
        self.dispatcher.submit("remove_history", move |store| {
            transition::remove(store, &ctx, &account, conversation.as_ref()).map(|_| ())
        });
    }

    /// Erases history and returns the number of removed items.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the unit fails or cannot run.
    pub fn remove_history_sync(
        &self,
        account: AccountId,
        conversation: Option<ConversationId>,
    ) -> Result<usize, HistoryError> {
        let ctx = self.ctx.clone();
        self.dispatcher.submit_sync(move |store| {
            transition::remove(store, &ctx, &account, conversation.as_ref())
        })
    }

    /// Publishes a transient chat state in order with other history units.
    pub fn process_chat_state(
        &self,
        account: AccountId,
        conversation: ConversationId,
        state: ChatState,
    ) {
        let notifier = self.ctx.notifier.clone();
        self.dispatcher.submit("process_chat_state", move |_| {
            tracing::trace!(account = %account, conversation = %conversation, state = %state, "chat state");
            notifier.publish(HistoryEvent::ChatStateChanged {
                account,
                conversation,
                state,
            });
            Ok(())
        });
    }

    // --- Queries ---

    /// Id of the newest item carrying `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the lookup fails or cannot run.
    pub fn item_id(
        &self,
        account: AccountId,
        conversation: ConversationId,
        correlation_id: CorrelationId,
    ) -> Result<Option<MessageId>, HistoryError> {
        self.dispatcher.submit_sync(move |store| {
            store.item_id_by_correlation(&account, &conversation, &correlation_id)
        })
    }

    /// Up to `limit` items older than `before`, newest first. Without an
    /// anchor the newest items are returned.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the read fails or cannot run.
    pub fn get_history(
        &self,
        account: AccountId,
        conversation: ConversationId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, HistoryError> {
        self.dispatcher.submit_sync(move |store| {
            pagination::page(store, &account, &conversation, before, limit)
        })
    }

    /// Like [`get_history`](Self::get_history), but delivers the page to
    /// `callback` on the worker instead of blocking.
    pub fn get_history_with<F>(
        &self,
        account: AccountId,
        conversation: ConversationId,
        before: Option<MessageId>,
        limit: usize,
        callback: F,
    ) where
        F: FnOnce(Result<Vec<MessageRecord>, HistoryError>) + Send + 'static,
    {
        self.dispatcher.submit("get_history", move |store| {
            callback(pagination::page(store, &account, &conversation, before, limit));
            Ok(())
        });
    }

    /// Awaitable form of [`get_history`](Self::get_history).
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the read fails or cannot run.
    pub async fn get_history_async(
        &self,
        account: AccountId,
        conversation: ConversationId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, HistoryError> {
        self.dispatcher
            .submit_async(move |store| {
                pagination::page(store, &account, &conversation, before, limit)
            })
            .await
    }

    /// Schema version of the open database.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the version cannot be read.
    pub fn schema_version(&self) -> Result<u32, HistoryError> {
        self.dispatcher.submit_sync(|store| store.schema_version())
    }

    // --- Events & lifecycle ---

    /// Subscribes to every history event.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.ctx.notifier.subscribe()
    }

    /// Subscribes to history events of the given kinds.
    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        self.ctx.notifier.subscribe_to(kinds)
    }

    /// Runs every queued unit, then stops the worker for all clones.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
