//! Async driver for one open conversation.
//!
//! A [`ConversationView`] owns a single task that drains an event queue fed
//! by the transport subscriptions, the history fetch, REST sends and the
//! handle's own methods. All mutation of the [`Conversation`] happens on that
//! task; the UI reads [`ConversationSnapshot`]s from a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use classhub_transport::{ChatTransport, ConnectionEvent, Subscription, TypingEvent};
use classhub_types::models::{ChatMessage, UserRef};

use crate::api::ChatApi;
use crate::conversation::{Conversation, ConversationSnapshot, SendRoute};
use crate::typing::{DEFAULT_TYPING_IDLE, TypingDebounce};

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub conversation_id: String,
    pub local_user: UserRef,
    /// Token used to connect the transport if it is not connected yet.
    pub token: String,
    pub typing_idle: Duration,
}

impl ViewOptions {
    pub fn new(conversation_id: impl Into<String>, local_user: UserRef, token: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            local_user,
            token: token.into(),
            typing_idle: DEFAULT_TYPING_IDLE,
        }
    }
}

enum ViewEvent {
    Message(ChatMessage),
    Typing(TypingEvent),
    Connection(ConnectionEvent),
    HistoryLoaded(Vec<ChatMessage>),
    HistoryFailed(String),
    RestSent {
        client_id: Uuid,
        result: Result<ChatMessage, String>,
    },
    Input(String),
    Send(String),
    Visible(bool),
    Close,
}

/// Handle to an open conversation. Dropping it closes the view.
pub struct ConversationView {
    conversation_id: String,
    events: mpsc::UnboundedSender<ViewEvent>,
    state: watch::Receiver<ConversationSnapshot>,
    task: Option<JoinHandle<ConversationSnapshot>>,
}

impl ConversationView {
    /// Open the view: connect if needed, join, subscribe, then fetch history.
    ///
    /// Subscriptions are registered before the fetch is issued, so live
    /// messages sent while history loads are not lost.
    pub fn open<A: ChatApi>(transport: Arc<dyn ChatTransport>, api: Arc<A>, options: ViewOptions) -> Self {
        let ViewOptions {
            conversation_id,
            local_user,
            token,
            typing_idle,
        } = options;

        let mut conversation = Conversation::new(
            conversation_id.clone(),
            local_user,
            TypingDebounce::new(typing_idle),
        );

        if let Err(e) = transport.connect(&token) {
            warn!("Cannot connect for conversation {}: {}", conversation_id, e);
            conversation.set_connection_error(true);
        }
        conversation.open(&*transport);

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = subscribe(&*transport, &tx);

        let fetch_tx = tx.clone();
        let fetch_api = api.clone();
        let fetch_id = conversation_id.clone();
        tokio::spawn(async move {
            let event = match fetch_api.fetch_history(&fetch_id).await {
                Ok(history) => ViewEvent::HistoryLoaded(history),
                Err(e) => ViewEvent::HistoryFailed(e.to_string()),
            };
            let _ = fetch_tx.send(event);
        });

        let (state_tx, state_rx) = watch::channel(conversation.snapshot());
        let task = tokio::spawn(run(
            conversation,
            transport,
            api,
            tx.clone(),
            rx,
            state_tx,
            subscriptions,
        ));

        Self {
            conversation_id,
            events: tx,
            state: state_rx,
            task: Some(task),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Input box content changed.
    pub fn input(&self, text: impl Into<String>) {
        self.post(ViewEvent::Input(text.into()));
    }

    pub fn send(&self, content: impl Into<String>) {
        self.post(ViewEvent::Send(content.into()));
    }

    pub fn set_visible(&self, visible: bool) {
        self.post(ViewEvent::Visible(visible));
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.state.clone()
    }

    /// Leave the conversation, drop its subscriptions and return the final state.
    pub async fn close(mut self) -> ConversationSnapshot {
        self.post(ViewEvent::Close);
        let Some(task) = self.task.take() else {
            return self.snapshot();
        };
        match task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("View task for {} ended abnormally: {}", self.conversation_id, e);
                self.snapshot()
            }
        }
    }

    fn post(&self, event: ViewEvent) {
        if self.events.send(event).is_err() {
            debug!("View {} already closed", self.conversation_id);
        }
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.events.send(ViewEvent::Close);
        }
    }
}

fn subscribe(transport: &dyn ChatTransport, tx: &mpsc::UnboundedSender<ViewEvent>) -> Vec<Subscription> {
    let messages = tx.clone();
    let typing = tx.clone();
    let connection = tx.clone();
    vec![
        transport.on_message(Box::new(move |msg: &ChatMessage| {
            let _ = messages.send(ViewEvent::Message(msg.clone()));
        })),
        transport.on_typing(Box::new(move |event: &TypingEvent| {
            let _ = typing.send(ViewEvent::Typing(event.clone()));
        })),
        transport.on_connection_event(Box::new(move |event: &ConnectionEvent| {
            let _ = connection.send(ViewEvent::Connection(event.clone()));
        })),
    ]
}

async fn run<A: ChatApi>(
    mut conversation: Conversation,
    transport: Arc<dyn ChatTransport>,
    api: Arc<A>,
    tx: mpsc::UnboundedSender<ViewEvent>,
    mut events: mpsc::UnboundedReceiver<ViewEvent>,
    state: watch::Sender<ConversationSnapshot>,
    subscriptions: Vec<Subscription>,
) -> ConversationSnapshot {
    loop {
        let timer = conversation.typing_deadline();
        let event = tokio::select! {
            event = events.recv() => event.unwrap_or(ViewEvent::Close),
            _ = sleep_until(timer.unwrap_or_else(Instant::now)), if timer.is_some() => {
                conversation.typing_timer_fired(&*transport, Instant::now());
                publish(&state, &conversation);
                continue;
            }
        };

        match event {
            ViewEvent::Message(msg) => {
                conversation.handle_message(msg, &*transport);
            }
            ViewEvent::Typing(event) => {
                conversation.handle_typing(&event);
            }
            ViewEvent::Connection(event) => {
                if let ConnectionEvent::Notification(msg) = &event {
                    debug!("Notification for {} from {}", msg.conversation_id, msg.sender.id);
                }
                conversation.handle_connection_event(&event, &*transport);
            }
            ViewEvent::HistoryLoaded(history) => conversation.history_loaded(history),
            ViewEvent::HistoryFailed(reason) => {
                warn!("Failed to load history for {}: {}", conversation.conversation_id(), reason);
                conversation.history_failed();
            }
            ViewEvent::RestSent { client_id, result } => match result {
                Ok(msg) => conversation.send_confirmed(client_id, msg),
                Err(reason) => conversation.send_failed(client_id, &reason),
            },
            ViewEvent::Input(text) => conversation.input_changed(&text, &*transport, Instant::now()),
            ViewEvent::Send(content) => {
                let Some(pending) = conversation.send(&content, &*transport) else {
                    continue;
                };
                if pending.route == SendRoute::Rest {
                    let api = api.clone();
                    let tx = tx.clone();
                    let conversation_id = conversation.conversation_id().to_string();
                    tokio::spawn(async move {
                        let result = api
                            .send_message(&conversation_id, &pending.content)
                            .await
                            .map_err(|e| e.to_string());
                        let _ = tx.send(ViewEvent::RestSent {
                            client_id: pending.client_id,
                            result,
                        });
                    });
                }
            }
            ViewEvent::Visible(visible) => conversation.set_visible(visible, &*transport),
            ViewEvent::Close => break,
        }

        publish(&state, &conversation);
    }

    conversation.close(&*transport);
    drop(subscriptions);
    publish(&state, &conversation);
    info!("View for {} closed", conversation.conversation_id());
    conversation.snapshot()
}

fn publish(state: &watch::Sender<ConversationSnapshot>, conversation: &Conversation) {
    let snapshot = conversation.snapshot();
    state.send_if_modified(|current| {
        if *current == snapshot {
            return false;
        }
        *current = snapshot;
        true
    });
}
