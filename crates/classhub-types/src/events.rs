use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatMessage;

/// Events pushed by the server over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server accepted the `identify` token
    Ready {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// A message was posted to a conversation this client has joined
    NewMessage(ChatMessage),

    /// A message was posted to any conversation of this user (badge/inbox use)
    MessageNotification(ChatMessage),

    /// The other party started typing
    UserTyping {
        #[serde(rename = "connectionId")]
        conversation_id: String,
    },

    /// The other party stopped typing
    UserStoppedTyping {
        #[serde(rename = "connectionId")]
        conversation_id: String,
    },

    /// The other party has read the conversation
    MessagesRead {
        #[serde(rename = "connectionId")]
        conversation_id: String,
    },

    /// Server-side failure report
    Error {
        #[serde(default)]
        message: String,
    },
}

impl ServerEvent {
    /// Returns the conversation id if this event is scoped to a conversation.
    /// `Ready` and `Error` are connection-wide.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::NewMessage(msg) | Self::MessageNotification(msg) => Some(msg.conversation_id.as_str()),
            Self::UserTyping { conversation_id }
            | Self::UserStoppedTyping { conversation_id }
            | Self::MessagesRead { conversation_id } => Some(conversation_id.as_str()),
            Self::Ready { .. } | Self::Error { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Authenticate the socket; must be the first frame
    Identify { token: String },

    /// Start receiving events for a conversation (bare id payload)
    JoinConversation(String),

    /// Stop receiving events for a conversation (bare id payload)
    LeaveConversation(String),

    /// Post a message; the confirmation arrives later as `new_message`
    SendMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<Uuid>,
    },

    MarkMessagesRead {
        #[serde(rename = "connectionId")]
        conversation_id: String,
    },

    TypingStart {
        #[serde(rename = "connectionId")]
        conversation_id: String,
    },

    TypingStop {
        #[serde(rename = "connectionId")]
        conversation_id: String,
    },
}

impl ClientCommand {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::JoinConversation(_) => "join_conversation",
            Self::LeaveConversation(_) => "leave_conversation",
            Self::SendMessage { .. } => "send_message",
            Self::MarkMessagesRead { .. } => "mark_messages_read",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
        }
    }
}
