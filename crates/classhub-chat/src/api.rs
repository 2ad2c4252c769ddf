use std::future::Future;

use thiserror::Error;

use classhub_types::models::ChatMessage;

/// Errors from the REST backend.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport or decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The base URL cannot carry the request path.
    #[error("Invalid API URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Non-2xx response.
    #[error("Request failed ({status}): {message}")]
    Status { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// REST collaborator of a conversation view: persisted history and the
/// send fallback used while the socket is down.
pub trait ChatApi: Send + Sync + 'static {
    /// Persisted messages of a conversation, oldest first.
    fn fetch_history(&self, conversation_id: &str) -> impl Future<Output = Result<Vec<ChatMessage>>> + Send;

    /// Persist a message; returns the stored document.
    fn send_message(&self, conversation_id: &str, content: &str) -> impl Future<Output = Result<ChatMessage>> + Send;
}
