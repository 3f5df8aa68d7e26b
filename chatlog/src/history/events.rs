//! Typed notifications about history changes.
//!
//! The store never calls into its consumers directly. Every change is
//! published as a [`HistoryEvent`] on a broadcast channel; UI views, unread
//! counters and conversation-list caches subscribe to the kinds they care
//! about.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use chatlog_proto::chat_state::ChatState;
use chatlog_proto::message::{AccountId, ConversationId, MessageRecord};

/// Discriminant of a [`HistoryEvent`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`HistoryEvent::MessageAdded`].
    MessageAdded,
    /// See [`HistoryEvent::MessageUpdated`].
    MessageUpdated,
    /// See [`HistoryEvent::MessagesMarkedRead`].
    MessagesMarkedRead,
    /// See [`HistoryEvent::HistoryRemoved`].
    HistoryRemoved,
    /// See [`HistoryEvent::ChatStateChanged`].
    ChatStateChanged,
}

/// A change to the persisted history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// A new record was inserted.
    MessageAdded(MessageRecord),
    /// An existing record changed state, error detail or preview.
    MessageUpdated(MessageRecord),
    /// Unread records of a conversation were marked as read in one batch.
    MessagesMarkedRead {
        /// Account owning the conversation.
        account: AccountId,
        /// Conversation that was marked.
        conversation: ConversationId,
    },
    /// History was erased for a conversation, or for the whole account.
    HistoryRemoved {
        /// Account whose history was erased.
        account: AccountId,
        /// The erased conversation; `None` means every conversation.
        conversation: Option<ConversationId>,
    },
    /// A participant's transient chat state changed.
    ChatStateChanged {
        /// Account receiving the state.
        account: AccountId,
        /// Conversation the state applies to.
        conversation: ConversationId,
        /// The new state.
        state: ChatState,
    },
}

impl HistoryEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::MessageAdded(_) => EventKind::MessageAdded,
            Self::MessageUpdated(_) => EventKind::MessageUpdated,
            Self::MessagesMarkedRead { .. } => EventKind::MessagesMarkedRead,
            Self::HistoryRemoved { .. } => EventKind::HistoryRemoved,
            Self::ChatStateChanged { .. } => EventKind::ChatStateChanged,
        }
    }
}

/// Publisher side of the history event stream.
///
/// Cloning yields another handle to the same stream.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<HistoryEvent>,
}

impl EventNotifier {
    /// Creates a notifier that buffers up to `capacity` events per slow
    /// subscriber before it starts skipping.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: HistoryEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => tracing::trace!(?kind, receivers, "history event published"),
            Err(_) => tracing::trace!(?kind, "history event published without subscribers"),
        }
    }

    /// Subscribes to every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }

    /// Subscribes to events of the given kinds only.
    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: Some(kinds.to_vec()),
        }
    }
}

/// Receiving side of the history event stream.
pub struct Subscription {
    rx: broadcast::Receiver<HistoryEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl Subscription {
    /// Waits for the next matching event.
    ///
    /// Returns `None` once the history engine has been dropped. If this
    /// subscriber fell behind, the missed events are skipped.
    pub async fn recv(&mut self) -> Option<HistoryEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "history subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<HistoryEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "history subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drains every matching event that is already queued.
    pub fn drain(&mut self) -> Vec<HistoryEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn wants(&self, event: &HistoryEvent) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind()))
    }
}
