//! Transient conversation state (chat state notifications).
//!
//! A chat state travels alongside an appended message but is never stored
//! with it. The history engine forwards it to subscribers even when the
//! message itself is discarded as a duplicate.

use serde::{Deserialize, Serialize};

/// Participant activity in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatState {
    /// Actively participating.
    Active,
    /// Typing a message.
    Composing,
    /// Stopped typing.
    Paused,
    /// Not paying attention.
    Inactive,
    /// Left the conversation.
    Gone,
}

impl std::fmt::Display for ChatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Composing => "composing",
            Self::Paused => "paused",
            Self::Inactive => "inactive",
            Self::Gone => "gone",
        };
        f.write_str(name)
    }
}
