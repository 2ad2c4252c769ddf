//! In-memory transport and API doubles for controller tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use classhub_transport::{
    Callback, ChatTransport, ConnectStatus, ConnectionEvent, Dispatcher, Subscription,
    TransportError, TypingEvent,
};
use classhub_types::events::ServerEvent;
use classhub_types::models::{ChatMessage, UserRef};

use crate::api::{ApiError, ChatApi};

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Connect,
    Join(String),
    Leave(String),
    Send {
        conversation_id: String,
        content: String,
        client_id: Option<Uuid>,
    },
    MarkRead(String),
    TypingStart(String),
    TypingStop(String),
}

/// Records intents (only while "connected", like the real manager) and lets
/// tests push inbound events through a real [`Dispatcher`].
#[derive(Default)]
pub struct FakeTransport {
    connected: AtomicBool,
    intents: Mutex<Vec<Intent>>,
    dispatcher: Dispatcher,
}

impl FakeTransport {
    pub fn connected() -> Arc<Self> {
        let transport = Self::default();
        transport.set_connected(true);
        Arc::new(transport)
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.intents.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Intent) -> bool) -> usize {
        self.intents.lock().unwrap().iter().filter(|&i| pred(i)).count()
    }

    pub fn clear_intents(&self) {
        self.intents.lock().unwrap().clear();
    }

    pub fn push(&self, event: ServerEvent) {
        self.dispatcher.dispatch(event);
    }

    pub fn push_connection(&self, event: ConnectionEvent) {
        self.dispatcher.connection().emit(&event);
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.messages().len()
            + self.dispatcher.typing().len()
            + self.dispatcher.connection().len()
    }

    fn record(&self, intent: Intent) {
        if self.connected.load(Ordering::SeqCst) {
            self.intents.lock().unwrap().push(intent);
        }
    }
}

impl ChatTransport for FakeTransport {
    fn connect(&self, token: &str) -> Result<ConnectStatus, TransportError> {
        if token.trim().is_empty() {
            return Err(TransportError::EmptyToken);
        }
        self.intents.lock().unwrap().push(Intent::Connect);
        if self.connected.load(Ordering::SeqCst) {
            Ok(ConnectStatus::AlreadyConnected)
        } else {
            Ok(ConnectStatus::Started)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn join_conversation(&self, conversation_id: &str) {
        self.record(Intent::Join(conversation_id.into()));
    }

    fn leave_conversation(&self, conversation_id: &str) {
        self.record(Intent::Leave(conversation_id.into()));
    }

    fn send_message(&self, conversation_id: &str, content: &str, client_id: Option<Uuid>) {
        self.record(Intent::Send {
            conversation_id: conversation_id.into(),
            content: content.into(),
            client_id,
        });
    }

    fn mark_read(&self, conversation_id: &str) {
        self.record(Intent::MarkRead(conversation_id.into()));
    }

    fn start_typing(&self, conversation_id: &str) {
        self.record(Intent::TypingStart(conversation_id.into()));
    }

    fn stop_typing(&self, conversation_id: &str) {
        self.record(Intent::TypingStop(conversation_id.into()));
    }

    fn on_message(&self, callback: Callback<ChatMessage>) -> Subscription {
        self.dispatcher.messages().register(callback)
    }

    fn on_typing(&self, callback: Callback<TypingEvent>) -> Subscription {
        self.dispatcher.typing().register(callback)
    }

    fn on_connection_event(&self, callback: Callback<ConnectionEvent>) -> Subscription {
        self.dispatcher.connection().register(callback)
    }
}

/// History/REST double. History can be held back until [`FakeApi::release`].
#[derive(Default)]
pub struct FakeApi {
    pub history: Mutex<Vec<ChatMessage>>,
    pub fail_history: AtomicBool,
    pub fail_send: AtomicBool,
    pub gated: AtomicBool,
    gate: Notify,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        let api = Self::default();
        api.gated.store(true, Ordering::SeqCst);
        Arc::new(api)
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl ChatApi for FakeApi {
    async fn fetch_history(&self, _conversation_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                message: "history offline".into(),
            });
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<ChatMessage, ApiError> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), content.to_string()));
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                message: "send offline".into(),
            });
        }
        let id = format!("rest-{}", self.sent.lock().unwrap().len());
        Ok(doc(&id, conversation_id, content, "me"))
    }
}

pub fn me() -> UserRef {
    UserRef::new("me", "Student")
}

pub fn peer() -> UserRef {
    UserRef::new("peer", "Expert")
}

/// Server document from `sender_id` ("me" or "peer").
pub fn doc(id: &str, conversation_id: &str, content: &str, sender_id: &str) -> ChatMessage {
    let sender = if sender_id == "me" { me() } else { peer() };
    ChatMessage {
        id: id.to_string(),
        content: content.to_string(),
        sender,
        receiver: None,
        conversation_id: conversation_id.to_string(),
        created_at: Utc::now(),
        is_read: false,
        client_id: None,
    }
}
