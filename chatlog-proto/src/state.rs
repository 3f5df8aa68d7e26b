//! Message read/error state and direction.
//!
//! A [`MessageState`] jointly encodes the direction of a message
//! (incoming/outgoing) and its status (normal/error × read/unread). The
//! persisted ordinal is chosen so that the direction is always
//! `ordinal % 2`: every incoming state is even, every outgoing state is odd.
//! Queries rely on that parity to filter by direction without a separate
//! column.

use serde::{Deserialize, Serialize};

/// Error returned when a persisted ordinal does not name a known state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The ordinal is not one of the defined [`MessageState`] values.
    #[error("unknown message state ordinal {0}")]
    UnknownState(i64),
}

/// Whether a message was received from a peer or sent by the local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Received from the remote side.
    Incoming,
    /// Sent by the local account.
    Outgoing,
}

impl Direction {
    /// Parity value shared by every state with this direction.
    #[must_use]
    pub const fn ordinal(self) -> i64 {
        match self {
            Self::Incoming => 0,
            Self::Outgoing => 1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incoming => f.write_str("incoming"),
            Self::Outgoing => f.write_str("outgoing"),
        }
    }
}

/// Persisted state of a history record.
///
/// The combination "outgoing, normal, unread" has no meaning (the local
/// account has always seen its own messages) and is not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Incoming message that has been read.
    Incoming,
    /// Outgoing message.
    Outgoing,
    /// Incoming message not yet seen by the user.
    IncomingUnread,
    /// Incoming error that has been seen.
    IncomingError,
    /// Outgoing message whose delivery failed; the failure has been seen.
    OutgoingError,
    /// Incoming error not yet seen by the user.
    IncomingErrorUnread,
    /// Outgoing message whose delivery failed; the failure has not been seen.
    OutgoingErrorUnread,
}

impl MessageState {
    /// Every defined state, in ordinal order.
    pub const ALL: [Self; 7] = [
        Self::Incoming,
        Self::Outgoing,
        Self::IncomingUnread,
        Self::IncomingError,
        Self::OutgoingError,
        Self::IncomingErrorUnread,
        Self::OutgoingErrorUnread,
    ];

    /// The value stored in the `state` column.
    #[must_use]
    pub const fn ordinal(self) -> i64 {
        match self {
            Self::Incoming => 0,
            Self::Outgoing => 1,
            Self::IncomingUnread => 2,
            Self::IncomingError => 4,
            Self::OutgoingError => 5,
            Self::IncomingErrorUnread => 6,
            Self::OutgoingErrorUnread => 7,
        }
    }

    /// Parse a state from its stored ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownState`] if the ordinal is not defined.
    /// Ordinal 3 (outgoing unread) is deliberately absent.
    pub const fn from_ordinal(value: i64) -> Result<Self, StateError> {
        match value {
            0 => Ok(Self::Incoming),
            1 => Ok(Self::Outgoing),
            2 => Ok(Self::IncomingUnread),
            4 => Ok(Self::IncomingError),
            5 => Ok(Self::OutgoingError),
            6 => Ok(Self::IncomingErrorUnread),
            7 => Ok(Self::OutgoingErrorUnread),
            other => Err(StateError::UnknownState(other)),
        }
    }

    /// Direction of the message, derived from the ordinal's parity.
    #[must_use]
    pub const fn direction(self) -> Direction {
        if self.ordinal() % 2 == 0 {
            Direction::Incoming
        } else {
            Direction::Outgoing
        }
    }

    /// Whether this state records a delivery or processing error.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::IncomingError
                | Self::OutgoingError
                | Self::IncomingErrorUnread
                | Self::OutgoingErrorUnread
        )
    }

    /// Whether the user has not yet seen this record.
    #[must_use]
    pub const fn is_unread(self) -> bool {
        matches!(
            self,
            Self::IncomingUnread | Self::IncomingErrorUnread | Self::OutgoingErrorUnread
        )
    }

    /// The state this one becomes when its conversation is marked as read.
    ///
    /// Read states map to themselves.
    #[must_use]
    pub const fn read(self) -> Self {
        match self {
            Self::IncomingUnread => Self::Incoming,
            Self::IncomingErrorUnread => Self::IncomingError,
            Self::OutgoingErrorUnread => Self::OutgoingError,
            other => other,
        }
    }

    /// The unread states that mark-as-read rewrites.
    #[must_use]
    pub const fn unread_states() -> [Self; 3] {
        [
            Self::IncomingUnread,
            Self::IncomingErrorUnread,
            Self::OutgoingErrorUnread,
        ]
    }

    /// Whether an explicit transition from `self` to `next` is legal.
    ///
    /// Legal edges keep the direction and either advance read status
    /// (unread → read) or introduce an error. Nothing leads from an error
    /// state back to a normal one, and a read record never becomes unread
    /// again except by turning into an error. Staying in the same state is
    /// always allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.ordinal() == next.ordinal() {
            return true;
        }
        if self.direction().ordinal() != next.direction().ordinal() {
            return false;
        }
        match (self.is_error(), next.is_error()) {
            (true, false) => false,
            (false, true) => true,
            _ => self.is_unread() && !next.is_unread(),
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::IncomingUnread => "incoming-unread",
            Self::IncomingError => "incoming-error",
            Self::OutgoingError => "outgoing-error",
            Self::IncomingErrorUnread => "incoming-error-unread",
            Self::OutgoingErrorUnread => "outgoing-error-unread",
        };
        f.pad(name)
    }
}
