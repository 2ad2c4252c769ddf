use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use classhub_types::events::{ClientCommand, ServerEvent};

use crate::config::{DEFAULT_HEARTBEAT_INTERVAL, TransportConfig};
use crate::dispatcher::Dispatcher;
use crate::error::TransportError;

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why [`run_connection_loop`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Shutdown was requested locally.
    Shutdown,
    /// The connection was lost; carries a human-readable reason.
    Lost(String),
}

/// Dial the socket, send `identify` and wait for `ready`.
///
/// Returns the authenticated socket and the user id the server bound it to.
pub async fn open(config: &TransportConfig, token: &str) -> Result<(Socket, String), TransportError> {
    debug!("Dialing {}", config.url);
    let (mut socket, _) = connect_async(config.url.as_str()).await?;

    let identify = serde_json::to_string(&ClientCommand::Identify {
        token: token.to_string(),
    })?;
    socket.send(Message::Text(identify.into())).await?;

    let user_id = tokio::time::timeout(config.handshake_timeout, wait_for_ready(&mut socket))
        .await
        .map_err(|_| TransportError::HandshakeTimeout)??;

    info!("Socket to {} identified as {}", config.url, user_id);
    Ok((socket, user_id))
}

async fn wait_for_ready(socket: &mut Socket) -> Result<String, TransportError> {
    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                Ok(ServerEvent::Ready { user_id }) => return Ok(user_id),
                Ok(ServerEvent::Error { message }) => return Err(TransportError::Rejected(message)),
                Ok(other) => debug!("Ignoring {:?} before ready", other),
                Err(e) => warn!("Bad frame during handshake: {} -- raw: {}", e, truncate(text.as_str())),
            },
            Message::Close(_) => return Err(TransportError::Closed),
            _ => {}
        }
    }
    Err(TransportError::Closed)
}

/// Pump one authenticated socket until it drops or `shutdown` fires.
///
/// Outbound commands are drained from `outgoing`; inbound text frames are
/// decoded and handed to `dispatcher`. Undecodable frames are logged and
/// skipped, never fatal.
pub async fn run_connection_loop(
    socket: Socket,
    mut outgoing: mpsc::UnboundedReceiver<ClientCommand>,
    dispatcher: Dispatcher,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> LoopExit {
    let (mut sink, mut stream) = socket.split();

    // `interval` panics on a zero period.
    let period = if heartbeat_interval.is_zero() {
        warn!("Zero heartbeat interval, using {:?}", DEFAULT_HEARTBEAT_INTERVAL);
        DEFAULT_HEARTBEAT_INTERVAL
    } else {
        heartbeat_interval
    };
    let mut heartbeat = tokio::time::interval(period);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return LoopExit::Shutdown;
            }
            cmd = outgoing.recv() => {
                let Some(cmd) = cmd else {
                    return LoopExit::Shutdown;
                };
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", cmd.name(), e);
                        continue;
                    }
                };
                trace!("-> {}", cmd.name());
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    return LoopExit::Lost(format!("send failed: {e}"));
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&dispatcher, text.as_str()),
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return LoopExit::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return LoopExit::Lost(e.to_string()),
                    None => return LoopExit::Lost("stream ended".to_string()),
                }
            }
            _ = heartbeat.tick() => {
                if pong_received {
                    pong_received = false;
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        return LoopExit::Lost("heartbeat timeout".to_string());
                    }
                }
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    return LoopExit::Lost(format!("ping failed: {e}"));
                }
            }
        }
    }
}

fn handle_text(dispatcher: &Dispatcher, text: &str) {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => {
            trace!("<- {:?}", event.conversation_id());
            dispatcher.dispatch(event);
        }
        Err(e) => warn!("Bad event: {} -- raw: {}", e, truncate(text)),
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
