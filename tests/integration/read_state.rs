//! Integration tests for read/error state management.

use chatlog::history::append::{AppendOutcome, AppendRequest};
use chatlog::history::events::{EventKind, HistoryEvent};
use chatlog::history::{ChatHistory, HistorySettings, ItemRef};
use chatlog_proto::message::{AccountId, ConversationId, CorrelationId, MessageId, Preview, Timestamp};
use chatlog_proto::state::MessageState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn history() -> ChatHistory {
    ChatHistory::in_memory(HistorySettings::default()).unwrap()
}

fn account() -> AccountId {
    AccountId::new("alice@example.com")
}

fn bob() -> ConversationId {
    ConversationId::new("bob@example.com")
}

fn append(history: &ChatHistory, state: MessageState, minute: u64) -> MessageId {
    let request = AppendRequest::new(
        account(),
        bob(),
        state,
        Timestamp::from_millis(minute * 600_000),
        format!("message {minute}"),
    );
    match history.append_item_sync(request).unwrap() {
        AppendOutcome::Inserted(id) => id,
        other => panic!("expected insert, got {other:?}"),
    }
}

fn state_of(history: &ChatHistory, id: MessageId) -> MessageState {
    history
        .get_history(account(), bob(), None, 100)
        .unwrap()
        .into_iter()
        .find(|r| r.id == id)
        .map(|r| r.state)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Mark as read
// ---------------------------------------------------------------------------

#[test]
fn mark_as_read_with_nothing_unread() {
    let history = history();
    append(&history, MessageState::Incoming, 1);
    let mut events = history.subscribe();

    assert_eq!(history.mark_as_read_sync(account(), bob()).unwrap(), 0);
    assert!(events.drain().is_empty());
}

#[test]
fn mark_as_read_maps_each_unread_state() {
    let history = history();
    let unread = append(&history, MessageState::IncomingUnread, 1);
    let in_err = append(&history, MessageState::IncomingErrorUnread, 2);
    let out_err = append(&history, MessageState::OutgoingErrorUnread, 3);
    let out = append(&history, MessageState::Outgoing, 4);
    let mut events = history.subscribe();

    assert_eq!(history.mark_as_read_sync(account(), bob()).unwrap(), 3);

    assert_eq!(state_of(&history, unread), MessageState::Incoming);
    assert_eq!(state_of(&history, in_err), MessageState::IncomingError);
    assert_eq!(state_of(&history, out_err), MessageState::OutgoingError);
    assert_eq!(state_of(&history, out), MessageState::Outgoing);

    assert_eq!(
        events.drain(),
        vec![HistoryEvent::MessagesMarkedRead {
            account: account(),
            conversation: bob(),
        }]
    );
}

#[test]
fn mark_as_read_leaves_other_conversations() {
    let history = history();
    let carol = ConversationId::new("carol@example.com");
    let request = AppendRequest::new(
        account(),
        carol.clone(),
        MessageState::IncomingUnread,
        Timestamp::from_millis(1),
        "hey",
    );
    history.append_item_sync(request).unwrap();
    append(&history, MessageState::IncomingUnread, 1);

    history.mark_as_read(account(), bob());
    let rows = history.get_history(account(), carol, None, 10).unwrap();
    assert_eq!(rows[0].state, MessageState::IncomingUnread);
}

// ---------------------------------------------------------------------------
// Explicit transitions
// ---------------------------------------------------------------------------

#[test]
fn stale_expected_state_leaves_record_unchanged() {
    let history = history();
    let id = append(&history, MessageState::Incoming, 1);
    let mut events = history.subscribe_to(&[EventKind::MessageUpdated]);

    let affected = history
        .update_item_state_sync(
            account(),
            bob(),
            ItemRef::Id(id),
            Some(MessageState::IncomingUnread),
            MessageState::Incoming,
        )
        .unwrap();

    assert_eq!(affected, 0);
    assert_eq!(state_of(&history, id), MessageState::Incoming);
    assert!(events.try_recv().is_none());
}

#[test]
fn transition_by_correlation_id_publishes_update() {
    let history = history();
    let cid = CorrelationId::new("c-77");
    let request = AppendRequest::new(
        account(),
        bob(),
        MessageState::Outgoing,
        Timestamp::from_millis(1),
        "ping",
    )
    .with_correlation_id(cid.clone());
    history.append_item_sync(request).unwrap();
    let mut events = history.subscribe_to(&[EventKind::MessageUpdated]);

    history.update_item_state(
        account(),
        bob(),
        ItemRef::Correlation(cid),
        Some(MessageState::Outgoing),
        MessageState::OutgoingErrorUnread,
    );
    history.schema_version().unwrap();

    match events.try_recv() {
        Some(HistoryEvent::MessageUpdated(record)) => {
            assert_eq!(record.state, MessageState::OutgoingErrorUnread);
        }
        other => panic!("expected MessageUpdated, got {other:?}"),
    }
}

#[test]
fn error_states_do_not_return_to_normal() {
    let history = history();
    let id = append(&history, MessageState::IncomingError, 1);
    let affected = history
        .update_item_state_sync(account(), bob(), id.into(), None, MessageState::Incoming)
        .unwrap();
    assert_eq!(affected, 0);
    assert_eq!(state_of(&history, id), MessageState::IncomingError);
}

#[test]
fn read_items_do_not_become_unread() {
    let history = history();
    let id = append(&history, MessageState::Incoming, 1);
    let mut events = history.subscribe_to(&[EventKind::MessageUpdated]);

    let affected = history
        .update_item_state_sync(account(), bob(), id.into(), None, MessageState::IncomingUnread)
        .unwrap();

    assert_eq!(affected, 0);
    assert_eq!(state_of(&history, id), MessageState::Incoming);
    assert!(events.try_recv().is_none());
}

// ---------------------------------------------------------------------------
// Previews
// ---------------------------------------------------------------------------

#[test]
fn preview_is_attached_and_kept() {
    let history = history();
    let id = append(&history, MessageState::Incoming, 1);
    let preview = Preview::new().with("https://example.com/cat.jpg", "/cache/cat.jpg");

    let mut events = history.subscribe_to(&[EventKind::MessageUpdated]);
    assert_eq!(
        history
            .update_item_sync(account(), bob(), id, Some(preview.clone()))
            .unwrap(),
        1
    );
    assert!(events.try_recv().is_some());

    history.update_item(account(), bob(), id, None);
    let rows = history.get_history(account(), bob(), None, 1).unwrap();
    assert_eq!(rows[0].preview.as_ref(), Some(&preview));
}

#[test]
fn preview_for_missing_item_is_a_no_op() {
    let history = history();
    let mut events = history.subscribe();
    let affected = history
        .update_item_sync(
            account(),
            bob(),
            MessageId::from_raw(404),
            Some(Preview::new().with("a", "b")),
        )
        .unwrap();
    assert_eq!(affected, 0);
    assert!(events.drain().is_empty());
}
