//! Conversation controller for classhub chat.
//!
//! [`conversation::Conversation`] is the framework-free state machine that
//! merges REST history, optimistic sends and live socket events into one
//! de-duplicated message list. [`view::ConversationView`] drives it from a
//! single task, wiring it to a [`classhub_transport::ChatTransport`] and a
//! [`api::ChatApi`].

pub mod api;
pub mod config;
pub mod conversation;
pub mod message;
pub mod rest;
pub mod typing;
pub mod view;

#[cfg(test)]
pub(crate) mod fake;
