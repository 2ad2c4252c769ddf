use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A party of a conversation as embedded in message documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A persisted chat message, as pushed over the socket and returned by the
/// history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub sender: UserRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserRef>,
    /// Conversation ("connection" on the wire) this message belongs to.
    #[serde(rename = "connection")]
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    /// Correlation id of the optimistic send, echoed back by servers that
    /// support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
}
