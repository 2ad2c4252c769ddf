use reqwest::{Client, RequestBuilder, Response, Url};
use tracing::debug;

use classhub_types::api::{ErrorResponse, SendMessageRequest};
use classhub_types::models::ChatMessage;

use crate::api::{ApiError, ChatApi, Result};

/// [`ChatApi`] over the classhub REST backend, authenticated with a bearer token.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL extended by `segments`, each percent-encoded as one path
    /// segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let invalid = |reason: String| ApiError::InvalidUrl {
            url: self.base_url.clone(),
            reason,
        };

        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

/// Turn a non-2xx response into [`ApiError::Status`], reading the backend's
/// `{ "message" }` body when there is one.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

impl ChatApi for RestClient {
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let url = self.url(&["connections", conversation_id, "messages"])?;
        debug!("GET {}", url);

        let response = self.authorized(self.http.get(url)).send().await?;
        let messages = check(response).await?.json::<Vec<ChatMessage>>().await?;
        Ok(messages)
    }

    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<ChatMessage> {
        let url = self.url(&["messages"])?;
        debug!("POST {}", url);

        let body = SendMessageRequest {
            content: content.to_string(),
            conversation_id: conversation_id.to_string(),
        };
        let response = self.authorized(self.http.post(url)).json(&body).send().await?;
        let message = check(response).await?.json::<ChatMessage>().await?;
        Ok(message)
    }
}
