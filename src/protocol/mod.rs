//! # Protocol Layer
//!
//! Typed request and reply messages and the dispatcher that routes them.
//!
//! A conversation is a sequence of request/reply pairs on one connection:
//!
//! ```text
//! client                              server
//!   | -- open_session {budget} -------> |
//!   | <------ session {session_id} ---- |
//!   | -- probe {tensor, shape, want} -> |   (repeated, each charges 1 query)
//!   | <-- response {label, ...} ------- |
//!   | -- close_session ---------------> |
//!   | <------------------ closed ------ |
//! ```
//!
//! Any request may instead be answered with an `error` document.

pub mod dispatcher;
pub mod message;

pub use dispatcher::Dispatcher;
pub use message::{ErrorReply, Message, Probe, Response, SessionId, Want};
