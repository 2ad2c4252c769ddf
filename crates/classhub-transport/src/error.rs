use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced while establishing a connection.
///
/// Once a connection is up, faults are no longer returned to callers; they are
/// delivered to connection listeners as [`crate::ConnectionEvent::Error`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// `connect` was called without a usable auth token.
    #[error("Auth token is empty")]
    EmptyToken,

    /// Dial, send or receive failure on the socket.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A frame could not be encoded.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// No `ready` within the handshake timeout.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// The server answered `identify` with an error.
    #[error("Server rejected identify: {0}")]
    Rejected(String),

    /// The socket closed before the handshake completed.
    #[error("Connection closed during handshake")]
    Closed,
}
