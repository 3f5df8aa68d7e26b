//! Integration tests for anchored history paging.
//!
//! A reader scrolling back passes the oldest id it already shows. Pages must
//! stay stable while writers keep appending newer items.

use chatlog::history::append::{AppendOutcome, AppendRequest};
use chatlog::history::{ChatHistory, HistorySettings};
use chatlog_proto::message::{AccountId, ConversationId, MessageId, MessageRecord, Timestamp};
use chatlog_proto::state::MessageState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MINUTE: u64 = 60_000;

fn history() -> ChatHistory {
    ChatHistory::in_memory(HistorySettings::default()).unwrap()
}

fn account() -> AccountId {
    AccountId::new("alice@example.com")
}

fn bob() -> ConversationId {
    ConversationId::new("bob@example.com")
}

fn at_minute(history: &ChatHistory, minute: u64) -> MessageId {
    let request = AppendRequest::new(
        account(),
        bob(),
        MessageState::Incoming,
        Timestamp::from_millis(minute * MINUTE),
        format!("minute {minute}"),
    );
    match history.append_item_sync(request).unwrap() {
        AppendOutcome::Inserted(id) => id,
        other => panic!("expected insert, got {other:?}"),
    }
}

fn minutes(records: &[MessageRecord]) -> Vec<u64> {
    records
        .iter()
        .map(|r| r.timestamp.as_millis() / MINUTE)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn anchor_returns_the_items_just_before_it() {
    let history = history();
    let ids: Vec<_> = (0..10).map(|m| at_minute(&history, m)).collect();

    let page = history
        .get_history(account(), bob(), Some(ids[5]), 3)
        .unwrap();
    assert_eq!(minutes(&page), vec![4, 3, 2]);
}

#[test]
fn page_is_stable_after_newer_append() {
    let history = history();
    let ids: Vec<_> = (0..10).map(|m| at_minute(&history, m)).collect();
    let before = history
        .get_history(account(), bob(), Some(ids[5]), 3)
        .unwrap();

    at_minute(&history, 10);

    let after = history
        .get_history(account(), bob(), Some(ids[5]), 3)
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn late_arrival_lands_in_its_place() {
    let history = history();
    for m in [0, 1, 2, 4, 5] {
        at_minute(&history, m);
    }
    let first = history.get_history(account(), bob(), None, 2).unwrap();
    assert_eq!(minutes(&first), vec![5, 4]);

    // Delayed delivery of an older message.
    at_minute(&history, 3);

    let anchor = first.last().unwrap().id;
    let next = history
        .get_history(account(), bob(), Some(anchor), 10)
        .unwrap();
    assert_eq!(minutes(&next), vec![3, 2, 1, 0]);
}

#[test]
fn walking_all_pages_visits_every_item_once() {
    let history = history();
    for m in 0..23 {
        at_minute(&history, m);
    }

    let mut seen = Vec::new();
    let mut anchor = None;
    loop {
        let page = history.get_history(account(), bob(), anchor, 5).unwrap();
        let Some(last) = page.last() else {
            break;
        };
        anchor = Some(last.id);
        seen.extend(minutes(&page));
    }
    assert_eq!(seen, (0..23).rev().collect::<Vec<_>>());
}

#[test]
fn anchor_from_another_conversation_is_ignored() {
    let history = history();
    for m in 0..3 {
        at_minute(&history, m);
    }
    let foreign = history
        .append_item_sync(AppendRequest::new(
            account(),
            ConversationId::new("carol@example.com"),
            MessageState::Incoming,
            Timestamp::from_millis(0),
            "elsewhere",
        ))
        .unwrap();
    let AppendOutcome::Inserted(foreign) = foreign else {
        panic!("expected insert");
    };

    let page = history
        .get_history(account(), bob(), Some(foreign), 10)
        .unwrap();
    assert_eq!(minutes(&page), vec![2, 1, 0]);
}

#[test]
fn callback_and_async_reads_match_blocking_read() {
    let history = history();
    let ids: Vec<_> = (0..6).map(|m| at_minute(&history, m)).collect();
    let blocking = history
        .get_history(account(), bob(), Some(ids[4]), 2)
        .unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    history.get_history_with(account(), bob(), Some(ids[4]), 2, move |page| {
        let _ = tx.send(page);
    });
    assert_eq!(rx.recv().unwrap().unwrap(), blocking);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let awaited = runtime
        .block_on(history.get_history_async(account(), bob(), Some(ids[4]), 2))
        .unwrap();
    assert_eq!(awaited, blocking);
}
