//! `chatlog`: durable message history engine for chat clients.
//!
//! The [`history::ChatHistory`] handle records messages arriving from the
//! network, reconciles delivery errors with previously sent messages, tracks
//! read/error state and serves stable, paginated history. Every store access
//! runs on a single serialized worker.

pub mod config;
pub mod history;
