use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use classhub_types::events::ClientCommand;
use classhub_types::models::ChatMessage;

use crate::config::TransportConfig;
use crate::connection::{self, LoopExit};
use crate::dispatcher::{ConnectionEvent, Dispatcher, Subscription, TypingEvent};
use crate::error::TransportError;
use crate::{Callback, ChatTransport};

/// Outcome of [`ChatTransport::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// A new connection attempt was started.
    Started,
    /// An attempt (or a reconnect cycle) is already running.
    InProgress,
    /// The socket is already up; nothing was done.
    AlreadyConnected,
}

/// Owns the session's single socket and fans its events out to listeners.
///
/// Construct one per session and hand clones to every conversation view.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: TransportConfig,
    dispatcher: Dispatcher,

    /// True while a handshaken socket is being pumped.
    connected: AtomicBool,

    /// True while the supervisor is dialing or backing off. The supervisor
    /// task is alive iff `connected || connecting`.
    connecting: AtomicBool,

    /// Sender into the live socket's write half, if any.
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientCommand>>>,

    /// Cancels the current supervisor.
    cancel: Mutex<CancellationToken>,

    supervisor: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the live-socket state when the supervisor ends, including by panic
/// or abort, so `connect` can start a fresh one.
struct SupervisorReset(Arc<ManagerInner>);

impl Drop for SupervisorReset {
    fn drop(&mut self) {
        lock(&self.0.outgoing).take();
        self.0.connected.store(false, Ordering::SeqCst);
        self.0.connecting.store(false, Ordering::SeqCst);
    }
}

impl ConnectionManager {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                dispatcher: Dispatcher::new(),
                connected: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                outgoing: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    /// Close the socket and stop reconnecting. Listeners stay registered, so
    /// a later `connect` resumes delivery to them.
    pub async fn shutdown(&self) {
        lock(&self.inner.cancel).cancel();

        let supervisor = lock(&self.inner.supervisor).take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Connection supervisor ended abnormally: {}", e);
                }
            }
        }

        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.connecting.store(false, Ordering::SeqCst);
        lock(&self.inner.outgoing).take();
        info!("Transport shut down");
    }

    fn emit(&self, cmd: ClientCommand) {
        if !self.is_connected() {
            warn!("Not connected, dropping {}", cmd.name());
            return;
        }

        let outgoing = lock(&self.inner.outgoing);
        match outgoing.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(cmd) {
                    warn!("Socket writer gone, dropping {}", e.0.name());
                }
            }
            None => warn!("Not connected, dropping {}", cmd.name()),
        }
    }
}

impl ChatTransport for ConnectionManager {
    fn connect(&self, token: &str) -> Result<ConnectStatus, TransportError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TransportError::EmptyToken);
        }

        if self.is_connected() {
            return Ok(ConnectStatus::AlreadyConnected);
        }

        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(ConnectStatus::InProgress);
        }

        // Lost the race against a supervisor that just finished its handshake.
        if self.is_connected() {
            self.inner.connecting.store(false, Ordering::SeqCst);
            return Ok(ConnectStatus::AlreadyConnected);
        }

        let cancel = CancellationToken::new();
        *lock(&self.inner.cancel) = cancel.clone();

        info!("Connecting to {}", self.inner.config.url);
        let handle = tokio::spawn(supervise(self.inner.clone(), token.to_string(), cancel));
        if let Some(previous) = lock(&self.inner.supervisor).replace(handle) {
            previous.abort();
        }

        Ok(ConnectStatus::Started)
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn join_conversation(&self, conversation_id: &str) {
        self.emit(ClientCommand::JoinConversation(conversation_id.to_string()));
    }

    fn leave_conversation(&self, conversation_id: &str) {
        self.emit(ClientCommand::LeaveConversation(conversation_id.to_string()));
    }

    fn send_message(&self, conversation_id: &str, content: &str, client_id: Option<Uuid>) {
        self.emit(ClientCommand::SendMessage {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            client_id,
        });
    }

    fn mark_read(&self, conversation_id: &str) {
        self.emit(ClientCommand::MarkMessagesRead {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn start_typing(&self, conversation_id: &str) {
        self.emit(ClientCommand::TypingStart {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn stop_typing(&self, conversation_id: &str) {
        self.emit(ClientCommand::TypingStop {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn on_message(&self, callback: Callback<ChatMessage>) -> Subscription {
        self.inner.dispatcher.messages().register(callback)
    }

    fn on_typing(&self, callback: Callback<TypingEvent>) -> Subscription {
        self.inner.dispatcher.typing().register(callback)
    }

    fn on_connection_event(&self, callback: Callback<ConnectionEvent>) -> Subscription {
        self.inner.dispatcher.connection().register(callback)
    }
}

/// Dial, pump and redial until cancelled or the reconnect budget is spent.
async fn supervise(inner: Arc<ManagerInner>, token: String, cancel: CancellationToken) {
    let _reset = SupervisorReset(inner.clone());
    let config = &inner.config;
    let connection_events = inner.dispatcher.connection().clone();
    let mut failures: u32 = 0;
    let mut established_before = false;

    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => break,
            dialed = connection::open(config, &token) => dialed,
        };

        match dialed {
            Ok((socket, _user_id)) => {
                failures = 0;
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&inner.outgoing) = Some(tx);
                inner.connected.store(true, Ordering::SeqCst);
                inner.connecting.store(false, Ordering::SeqCst);

                let event = if established_before {
                    ConnectionEvent::Reconnected
                } else {
                    ConnectionEvent::Connected
                };
                established_before = true;
                connection_events.emit(&event);

                let exit = connection::run_connection_loop(
                    socket,
                    rx,
                    inner.dispatcher.clone(),
                    config.heartbeat_interval,
                    cancel.clone(),
                )
                .await;

                inner.connecting.store(true, Ordering::SeqCst);
                inner.connected.store(false, Ordering::SeqCst);
                lock(&inner.outgoing).take();

                match exit {
                    LoopExit::Shutdown => break,
                    LoopExit::Lost(reason) => {
                        warn!("Connection to {} lost: {}", config.url, reason);
                        connection_events.emit(&ConnectionEvent::Disconnected { reason });
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!("Connection attempt {} to {} failed: {}", failures, config.url, e);
                connection_events.emit(&ConnectionEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        let attempt = failures + 1;
        if !config.reconnect.allows(attempt) {
            warn!("Giving up on {} after {} failed attempts", config.url, failures);
            break;
        }

        let delay = config.reconnect.delay_for(attempt);
        info!("Reconnecting to {} in {:?}", config.url, delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("Connection supervisor for {} stopped", config.url);
}
