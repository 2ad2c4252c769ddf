//! Real-time transport for classhub conversations.
//!
//! [`ConnectionManager`] owns the one authenticated socket of a session and
//! fans inbound events out to listeners registered through [`ChatTransport`].
//! Conversation controllers depend on the trait, not on the manager, so they
//! can be driven by in-memory fakes in tests.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod manager;

use uuid::Uuid;

use classhub_types::models::ChatMessage;

pub use config::{ReconnectPolicy, TransportConfig};
pub use dispatcher::{ConnectionEvent, Dispatcher, Listeners, Subscription, TypingEvent};
pub use error::TransportError;
pub use manager::{ConnectStatus, ConnectionManager};

/// Boxed listener invoked once per matching inbound event.
pub type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Outbound intents and inbound subscriptions of a real-time chat connection.
///
/// Every intent is fire-and-forget: when the connection is down it is
/// dropped with a warning instead of failing.
pub trait ChatTransport: Send + Sync {
    /// Start connecting with `token` unless a connection is live or in flight.
    fn connect(&self, token: &str) -> Result<ConnectStatus, TransportError>;

    fn is_connected(&self) -> bool;

    fn join_conversation(&self, conversation_id: &str);

    fn leave_conversation(&self, conversation_id: &str);

    /// Post a message. Confirmation arrives later through [`ChatTransport::on_message`].
    fn send_message(&self, conversation_id: &str, content: &str, client_id: Option<Uuid>);

    fn mark_read(&self, conversation_id: &str);

    fn start_typing(&self, conversation_id: &str);

    fn stop_typing(&self, conversation_id: &str);

    fn on_message(&self, callback: Callback<ChatMessage>) -> Subscription;

    fn on_typing(&self, callback: Callback<TypingEvent>) -> Subscription;

    fn on_connection_event(&self, callback: Callback<ConnectionEvent>) -> Subscription;
}
