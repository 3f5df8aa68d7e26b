//! Integration tests for appending items and discarding duplicates.
//!
//! Servers replay archived messages and clocks drift, so the same message
//! can be reported several times with slightly different timestamps. Only
//! the first report may create a record.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chatlog::history::append::{AppendOutcome, AppendRequest};
use chatlog::history::events::{EventKind, HistoryEvent};
use chatlog::history::{ChatHistory, HistorySettings};
use chatlog_proto::chat_state::ChatState;
use chatlog_proto::message::{AccountId, ConversationId, CorrelationId, Timestamp};
use chatlog_proto::state::MessageState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MINUTE: u64 = 60_000;
const BASE: u64 = 1_700_000_000_000;

fn history() -> ChatHistory {
    ChatHistory::in_memory(HistorySettings::default()).unwrap()
}

fn account() -> AccountId {
    AccountId::new("alice@example.com")
}

fn room() -> ConversationId {
    ConversationId::new("lobby@conference.example.com")
}

fn from_bob(minutes: u64, body: &str) -> AppendRequest {
    AppendRequest::new(
        account(),
        room(),
        MessageState::IncomingUnread,
        Timestamp::from_millis(BASE + minutes * MINUTE),
        body,
    )
    .with_author("bob", None)
}

fn count(history: &ChatHistory) -> usize {
    history.get_history(account(), room(), None, 100).unwrap().len()
}

// ---------------------------------------------------------------------------
// Window semantics
// ---------------------------------------------------------------------------

#[test]
fn same_item_twice_creates_one_record() {
    let history = history();
    assert!(matches!(
        history.append_item_sync(from_bob(0, "hi")).unwrap(),
        AppendOutcome::Inserted(_)
    ));
    assert_eq!(
        history.append_item_sync(from_bob(0, "hi")).unwrap(),
        AppendOutcome::Duplicate
    );
    assert_eq!(count(&history), 1);
}

#[test]
fn four_minutes_apart_is_a_duplicate() {
    let history = history();
    history.append_item_sync(from_bob(0, "hi")).unwrap();
    history.append_item_sync(from_bob(4, "hi")).unwrap();
    assert_eq!(count(&history), 1);
}

#[test]
fn six_minutes_apart_is_a_new_message() {
    let history = history();
    history.append_item_sync(from_bob(0, "hi")).unwrap();
    history.append_item_sync(from_bob(6, "hi")).unwrap();
    assert_eq!(count(&history), 2);
}

#[test]
fn correlation_id_widens_the_window() {
    let history = history();
    let cid = CorrelationId::new("msg-1");
    history
        .append_item_sync(from_bob(0, "hi").with_correlation_id(cid.clone()))
        .unwrap();

    history
        .append_item_sync(from_bob(59, "hi").with_correlation_id(cid.clone()))
        .unwrap();
    assert_eq!(count(&history), 1);

    history
        .append_item_sync(from_bob(61, "hi").with_correlation_id(cid))
        .unwrap();
    assert_eq!(count(&history), 2);
}

#[test]
fn configured_window_is_honoured() {
    let mut settings = HistorySettings::default();
    settings.dedup.plain = std::time::Duration::from_secs(30);
    let history = ChatHistory::in_memory(settings).unwrap();

    history.append_item_sync(from_bob(0, "hi")).unwrap();
    history.append_item_sync(from_bob(1, "hi")).unwrap();
    assert_eq!(count(&history), 2);
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

#[test]
fn duplicate_does_not_invoke_callback_or_publish_added() {
    let history = history();
    history.append_item_sync(from_bob(0, "hi")).unwrap();

    let mut events = history.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = Arc::clone(&calls);
    history.append_item(
        from_bob(1, "hi"),
        Some(Box::new(move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        })),
    );
    // Barrier: the previous unit has completed once this returns.
    history.schema_version().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(events.drain().is_empty());
}

#[test]
fn duplicate_still_forwards_chat_state() {
    let history = history();
    history.append_item_sync(from_bob(0, "hi")).unwrap();

    let mut events = history.subscribe_to(&[EventKind::ChatStateChanged]);
    history
        .append_item_sync(from_bob(0, "hi").with_chat_state(ChatState::Active))
        .unwrap();

    assert_eq!(
        events.try_recv(),
        Some(HistoryEvent::ChatStateChanged {
            account: account(),
            conversation: room(),
            state: ChatState::Active,
        })
    );
}

#[test]
fn callback_runs_before_added_event() {
    let history = history();
    let mut events = history.subscribe();
    let (tx, rx) = std::sync::mpsc::channel();
    history.append_item(
        from_bob(0, "hi"),
        Some(Box::new(move |id| {
            let _ = tx.send(id);
        })),
    );
    let id = rx.recv().unwrap();
    history.schema_version().unwrap();

    match events.try_recv() {
        Some(HistoryEvent::MessageAdded(record)) => {
            assert_eq!(record.id, id);
            assert_eq!(record.author_nickname.as_deref(), Some("bob"));
            assert_eq!(record.state, MessageState::IncomingUnread);
        }
        other => panic!("expected MessageAdded, got {other:?}"),
    }
}

#[test]
fn concurrent_producers_never_duplicate() {
    let history = history();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let history = history.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    history.append_item(from_bob(0, "storm"), None);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(count(&history), 1);
}
