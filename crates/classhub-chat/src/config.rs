//! Client configuration loaded from `CLASSHUB_*` environment variables.
//!
//! Every setting but the token has a default suitable for a local backend.

use std::time::Duration;

use anyhow::{Context, bail};

use classhub_transport::{ReconnectPolicy, TransportConfig};
use classhub_types::models::UserRef;

use crate::typing::DEFAULT_TYPING_IDLE;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket endpoint, `ws://` or `wss://`.
    /// Env: `CLASSHUB_WS_URL`
    /// Default: `ws://127.0.0.1:3000/socket`
    pub ws_url: String,

    /// REST base URL.
    /// Env: `CLASSHUB_API_URL`
    /// Default: `http://127.0.0.1:3000/api`
    pub api_url: String,

    /// Bearer token for both the socket handshake and REST.
    /// Env: `CLASSHUB_TOKEN`
    pub token: Option<String>,

    /// Local user; messages from this id are tagged as local.
    /// Env: `CLASSHUB_USER_ID`, `CLASSHUB_USER_NAME`
    pub user: UserRef,

    /// Env: `CLASSHUB_TYPING_IDLE_MS`
    /// Default: `3000`
    pub typing_idle: Duration,

    /// Env: `CLASSHUB_HANDSHAKE_TIMEOUT_MS`
    /// Default: `10000`
    pub handshake_timeout: Duration,

    /// Env: `CLASSHUB_HEARTBEAT_SECS` (at least 1)
    /// Default: `15`
    pub heartbeat_interval: Duration,

    /// Consecutive failed dials before giving up (0 disables reconnecting).
    /// Env: `CLASSHUB_RECONNECT_ATTEMPTS`
    /// Default: `5`
    pub reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:3000/socket".to_string(),
            api_url: "http://127.0.0.1:3000/api".to_string(),
            token: None,
            user: UserRef::new("", ""),
            typing_idle: DEFAULT_TYPING_IDLE,
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            reconnect_attempts: 5,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("CLASSHUB_WS_URL") {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                bail!("CLASSHUB_WS_URL must be a ws:// or wss:// URL, got {url}");
            }
            config.ws_url = url;
        }
        if let Some(url) = get("CLASSHUB_API_URL") {
            config.api_url = url;
        }
        config.token = get("CLASSHUB_TOKEN");

        if let Some(id) = get("CLASSHUB_USER_ID") {
            config.user.id = id;
        }
        if let Some(name) = get("CLASSHUB_USER_NAME") {
            config.user.name = name;
        }

        if let Some(ms) = get("CLASSHUB_TYPING_IDLE_MS") {
            let ms: u64 = ms.parse().context("CLASSHUB_TYPING_IDLE_MS")?;
            config.typing_idle = Duration::from_millis(ms);
        }
        if let Some(ms) = get("CLASSHUB_HANDSHAKE_TIMEOUT_MS") {
            let ms: u64 = ms.parse().context("CLASSHUB_HANDSHAKE_TIMEOUT_MS")?;
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = get("CLASSHUB_HEARTBEAT_SECS") {
            let secs: u64 = secs.parse().context("CLASSHUB_HEARTBEAT_SECS")?;
            if secs == 0 {
                bail!("CLASSHUB_HEARTBEAT_SECS must be at least 1");
            }
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = get("CLASSHUB_RECONNECT_ATTEMPTS") {
            config.reconnect_attempts = attempts.parse().context("CLASSHUB_RECONNECT_ATTEMPTS")?;
        }

        Ok(config)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let mut transport = TransportConfig::new(self.ws_url.clone());
        transport.handshake_timeout = self.handshake_timeout;
        transport.heartbeat_interval = self.heartbeat_interval;
        transport.reconnect = ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            ..ReconnectPolicy::default()
        };
        transport
    }
}
