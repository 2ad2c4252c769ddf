use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace, warn};

use classhub_types::events::ServerEvent;
use classhub_types::models::ChatMessage;

/// Typing indicator change for a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub conversation_id: String,
    pub typing: bool,
}

/// Connection lifecycle and connection-wide notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// First successful handshake of a `connect` call
    Connected,
    /// Handshake succeeded again after a drop
    Reconnected,
    /// An established connection was lost
    Disconnected { reason: String },
    /// Dial/handshake failure or a server-side error report
    Error { message: String },
    /// The other party read a conversation
    MessagesRead { conversation_id: String },
    /// A message arrived for any conversation of this user
    Notification(ChatMessage),
}

impl ConnectionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
            Self::MessagesRead { .. } => "messages_read",
            Self::Notification(_) => "notification",
        }
    }
}

type SharedCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    /// Keyed by a monotonically increasing id, so iteration order is
    /// registration order.
    callbacks: BTreeMap<u64, SharedCallback<E>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fan-out registry for one category of events.
pub struct Listeners<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: BTreeMap::new(),
            })),
        }
    }
}

impl<E: 'static> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It stays live until the returned [`Subscription`]
    /// is cancelled or dropped.
    pub fn register<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.insert(id, Arc::new(callback));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).callbacks.remove(&id);
            }
        })
    }

    /// Invoke every live callback once, in registration order. Returns how
    /// many were invoked.
    ///
    /// Callbacks run outside the registry lock and may register or cancel
    /// subscriptions themselves. Each one is re-checked just before its turn,
    /// so a listener cancelled earlier in the same emit is skipped.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<(u64, SharedCallback<E>)> = lock(&self.inner)
            .callbacks
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect();

        let mut invoked = 0;
        for (id, callback) in &snapshot {
            if !lock(&self.inner).callbacks.contains_key(id) {
                continue;
            }
            callback(event);
            invoked += 1;
        }
        invoked
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to a registered listener. Cancelling (or dropping) it removes the
/// listener, so no emit that reaches it afterwards will invoke it. An emit
/// already running the callback on another thread is not waited for and may
/// finish that one call.
#[must_use = "dropping a Subscription cancels it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

/// Routes decoded server events to the three listener categories.
#[derive(Clone, Default)]
pub struct Dispatcher {
    messages: Listeners<ChatMessage>,
    typing: Listeners<TypingEvent>,
    connection: Listeners<ConnectionEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &Listeners<ChatMessage> {
        &self.messages
    }

    pub fn typing(&self) -> &Listeners<TypingEvent> {
        &self.typing
    }

    pub fn connection(&self) -> &Listeners<ConnectionEvent> {
        &self.connection
    }

    /// Deliver one inbound event to its listeners.
    pub fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(msg) => {
                let delivered = self.messages.emit(&msg);
                trace!(
                    "message {} for {} delivered to {} listeners",
                    msg.id, msg.conversation_id, delivered
                );
            }
            ServerEvent::MessageNotification(msg) => {
                self.connection.emit(&ConnectionEvent::Notification(msg));
            }
            ServerEvent::UserTyping { conversation_id } => {
                self.typing.emit(&TypingEvent {
                    conversation_id,
                    typing: true,
                });
            }
            ServerEvent::UserStoppedTyping { conversation_id } => {
                self.typing.emit(&TypingEvent {
                    conversation_id,
                    typing: false,
                });
            }
            ServerEvent::MessagesRead { conversation_id } => {
                self.connection
                    .emit(&ConnectionEvent::MessagesRead { conversation_id });
            }
            ServerEvent::Error { message } => {
                warn!("Server reported error: {}", message);
                self.connection.emit(&ConnectionEvent::Error { message });
            }
            ServerEvent::Ready { user_id } => {
                debug!("Ignoring ready for {} outside handshake", user_id);
            }
        }
    }
}
