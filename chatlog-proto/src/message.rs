//! History record types.
//!
//! Identifiers are opaque newtypes: the engine never interprets an account
//! or conversation beyond equality. [`MessageId`] is assigned by the store
//! at insert time and never changes afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::{Direction, MessageState};

/// Store-assigned identifier of a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(i64);

impl MessageId {
    /// Wraps a row id returned by the store.
    #[must_use]
    pub const fn from_raw(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn as_raw(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Local account a record belongs to (the connected session's bare address).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an account identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Peer or room a record is associated with.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a conversation identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Protocol-level id linking a later receipt or error back to a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wraps an id received from the protocol layer.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
///
/// The store persists timestamps as signed 64-bit integers and rejects
/// values above `i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Moves the timestamp back by `window`, clamping at the epoch.
    #[must_use]
    pub fn saturating_sub(self, window: std::time::Duration) -> Self {
        let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// Moves the timestamp forward by `window`, clamping at `u64::MAX`.
    #[must_use]
    pub fn saturating_add(self, window: std::time::Duration) -> Self {
        let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Kind of history item. Stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemType {
    /// A chat message with a text body.
    #[default]
    Message,
    // Future variants: attachment, call log, etc.
}

impl ItemType {
    /// Value stored in the `item_type` column.
    #[must_use]
    pub const fn ordinal(self) -> i64 {
        match self {
            Self::Message => 0,
        }
    }

    /// Parse an item type from its stored value.
    #[must_use]
    pub const fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            _ => None,
        }
    }
}

/// Artifacts generated for a record after it was stored, e.g. a thumbnail.
///
/// Keys name the artifact type, values are locators (paths or URLs). The
/// mapping is ordered so that its serialized form is stable. A preview is
/// never part of a record's dedup identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preview(BTreeMap<String, String>);

impl Preview {
    /// Creates an empty preview.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds or replaces an artifact locator, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, kind: impl Into<String>, locator: impl Into<String>) -> Self {
        self.0.insert(kind.into(), locator.into());
        self
    }
}

/// A persisted history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Store-assigned id.
    pub id: MessageId,
    /// Owning account.
    pub account: AccountId,
    /// Peer or room.
    pub conversation: ConversationId,
    /// Origin time reported by the sender.
    pub timestamp: Timestamp,
    /// Kind of item.
    pub item_type: ItemType,
    /// Read/error state; also encodes the direction.
    pub state: MessageState,
    /// Message text.
    pub body: String,
    /// Protocol id of the message, if the sender supplied one.
    pub correlation_id: Option<CorrelationId>,
    /// Nickname of the author (group chats).
    pub author_nickname: Option<String>,
    /// Real address of the author, when known.
    pub author_id: Option<String>,
    /// Artifacts attached after insert.
    pub preview: Option<Preview>,
    /// Error detail for failed deliveries.
    pub error: Option<String>,
}

impl MessageRecord {
    /// Direction of the record, derived from its state.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.state.direction()
    }
}
