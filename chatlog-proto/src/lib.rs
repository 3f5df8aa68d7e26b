//! Shared data model for the `chatlog` message history engine.

pub mod chat_state;
pub mod message;
pub mod state;
