//! Integration tests for history erasure and on-disk persistence.

use chatlog::history::append::AppendRequest;
use chatlog::history::events::{EventKind, HistoryEvent};
use chatlog::history::schema;
use chatlog::history::{ChatHistory, HistorySettings};
use chatlog_proto::message::{AccountId, ConversationId, Timestamp};
use chatlog_proto::state::MessageState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn alice() -> AccountId {
    AccountId::new("alice@example.com")
}

fn bob() -> ConversationId {
    ConversationId::new("bob@example.com")
}

fn carol() -> ConversationId {
    ConversationId::new("carol@example.com")
}

fn seed(history: &ChatHistory, account: &AccountId, conversation: &ConversationId) {
    for i in 0..3 {
        history
            .append_item_sync(AppendRequest::new(
                account.clone(),
                conversation.clone(),
                MessageState::Incoming,
                Timestamp::from_millis(i * 3_600_000),
                format!("{conversation} #{i}"),
            ))
            .unwrap();
    }
}

fn len(history: &ChatHistory, account: &AccountId, conversation: &ConversationId) -> usize {
    history
        .get_history(account.clone(), conversation.clone(), None, 100)
        .unwrap()
        .len()
}

// ---------------------------------------------------------------------------
// Scoping
// ---------------------------------------------------------------------------

#[test]
fn removing_one_conversation_keeps_the_rest() {
    let history = ChatHistory::in_memory(HistorySettings::default()).unwrap();
    let other = AccountId::new("work@example.com");
    seed(&history, &alice(), &bob());
    seed(&history, &alice(), &carol());
    seed(&history, &other, &bob());

    let mut events = history.subscribe_to(&[EventKind::HistoryRemoved]);
    assert_eq!(history.remove_history_sync(alice(), Some(bob())).unwrap(), 3);

    assert_eq!(len(&history, &alice(), &bob()), 0);
    assert_eq!(len(&history, &alice(), &carol()), 3);
    assert_eq!(len(&history, &other, &bob()), 3);
    assert_eq!(
        events.try_recv(),
        Some(HistoryEvent::HistoryRemoved {
            account: alice(),
            conversation: Some(bob()),
        })
    );
}

#[test]
fn removing_an_account_erases_all_its_conversations() {
    let history = ChatHistory::in_memory(HistorySettings::default()).unwrap();
    let other = AccountId::new("work@example.com");
    seed(&history, &alice(), &bob());
    seed(&history, &alice(), &carol());
    seed(&history, &other, &bob());

    history.remove_history(alice(), None);

    assert_eq!(len(&history, &alice(), &bob()), 0);
    assert_eq!(len(&history, &alice(), &carol()), 0);
    assert_eq!(len(&history, &other, &bob()), 3);
}

#[test]
fn removing_nothing_publishes_nothing() {
    let history = ChatHistory::in_memory(HistorySettings::default()).unwrap();
    let mut events = history.subscribe();
    assert_eq!(history.remove_history_sync(alice(), None).unwrap(), 0);
    assert!(events.drain().is_empty());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");

    {
        let history = ChatHistory::open(&path, HistorySettings::default()).unwrap();
        seed(&history, &alice(), &bob());
        assert_eq!(history.schema_version().unwrap(), schema::current_version());
    }

    let history = ChatHistory::open(&path, HistorySettings::default()).unwrap();
    assert_eq!(len(&history, &alice(), &bob()), 3);
    assert_eq!(history.schema_version().unwrap(), schema::current_version());
}

#[test]
fn queued_async_writes_are_flushed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");

    {
        let history = ChatHistory::open(&path, HistorySettings::default()).unwrap();
        for i in 0..20 {
            history.append_item(
                AppendRequest::new(
                    alice(),
                    bob(),
                    MessageState::IncomingUnread,
                    Timestamp::from_millis(i * 3_600_000),
                    format!("queued {i}"),
                ),
                None,
            );
        }
    }

    let history = ChatHistory::open(&path, HistorySettings::default()).unwrap();
    assert_eq!(len(&history, &alice(), &bob()), 20);
}
