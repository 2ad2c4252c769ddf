use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use classhub_types::models::{ChatMessage, UserRef};

/// Identity of a list entry: server-assigned once confirmed, a client
/// correlation id while still optimistic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Server(String),
    Pending(Uuid),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Pending(id) => write!(f, "temp_{id}"),
        }
    }
}

/// One entry of a conversation's message list.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: UserRef,
    pub receiver: Option<UserRef>,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    /// Sender is the local user.
    pub is_local: bool,
}

impl Message {
    /// Locally created entry shown before the server confirms it.
    pub fn optimistic(
        client_id: Uuid,
        conversation_id: &str,
        content: &str,
        sender: UserRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::Pending(client_id),
            content: content.to_string(),
            sender,
            receiver: None,
            conversation_id: conversation_id.to_string(),
            created_at,
            read: false,
            is_local: true,
        }
    }

    /// Entry built from a server document, tagged against the local user id.
    pub fn confirmed(msg: ChatMessage, local_user_id: &str) -> Self {
        let is_local = msg.sender.id == local_user_id;
        Self {
            id: MessageId::Server(msg.id),
            content: msg.content,
            sender: msg.sender,
            receiver: msg.receiver,
            conversation_id: msg.conversation_id,
            created_at: msg.created_at,
            read: msg.is_read,
            is_local,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self.id, MessageId::Pending(_))
    }

    /// Correlation id of an optimistic entry.
    pub fn client_id(&self) -> Option<Uuid> {
        match self.id {
            MessageId::Pending(id) => Some(id),
            MessageId::Server(_) => None,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        match &self.id {
            MessageId::Server(id) => Some(id.as_str()),
            MessageId::Pending(_) => None,
        }
    }
}
