use serde::{Deserialize, Serialize};

// -- Messages --

/// Body of the REST send endpoint, used when the socket is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(rename = "connectionId")]
    pub conversation_id: String,
}

/// Error body returned by the REST backend on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
}
