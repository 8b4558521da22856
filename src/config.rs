//! Chat core configuration parsed from environment variables.

use crate::error::ConfigError;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ASSISTANT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 500;
pub const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
pub const DEFAULT_TYPING_IDLE_MS: u64 = 2_000;

/// Typed configuration for the chat core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Base URL of the REST API, no trailing slash.
    pub api_base_url: String,
    /// Websocket URL of the push hub.
    pub hub_url: String,
    /// Conversation whose sends go to the long-running AI assistant endpoint
    /// and therefore use the extended timeout.
    pub assistant_conversation_id: Option<String>,
    /// History page size. A full page implies more may exist.
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Per-call timeout override for the AI assistant conversation.
    pub assistant_timeout_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    /// Idle window after the last keystroke before "stopped typing" is sent.
    pub typing_idle_ms: u64,
}

impl ChatConfig {
    /// Config with defaults for everything but the two endpoints.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>, hub_url: impl Into<String>) -> Self {
        Self {
            api_base_url: trim_base(api_base_url.into()),
            hub_url: hub_url.into(),
            assistant_conversation_id: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            assistant_timeout_secs: DEFAULT_ASSISTANT_TIMEOUT_SECS,
            reconnect_base_ms: DEFAULT_RECONNECT_BASE_MS,
            reconnect_cap_ms: DEFAULT_RECONNECT_CAP_MS,
            typing_idle_ms: DEFAULT_TYPING_IDLE_MS,
        }
    }

    /// Build config from environment variables.
    ///
    /// Required:
    /// - `CHAT_API_BASE_URL`
    /// - `CHAT_HUB_URL`
    ///
    /// Optional:
    /// - `CHAT_ASSISTANT_CONVERSATION_ID`
    /// - `CHAT_PAGE_SIZE`: default 50
    /// - `CHAT_REQUEST_TIMEOUT_SECS`: default 15
    /// - `CHAT_CONNECT_TIMEOUT_SECS`: default 10
    /// - `CHAT_ASSISTANT_TIMEOUT_SECS`: default 120
    /// - `CHAT_RECONNECT_BASE_MS` / `CHAT_RECONNECT_CAP_MS`: default 500 / 30000
    /// - `CHAT_TYPING_IDLE_MS`: default 2000
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] when a required variable is absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url =
            std::env::var("CHAT_API_BASE_URL").map_err(|_| ConfigError::MissingVar("CHAT_API_BASE_URL"))?;
        let hub_url = std::env::var("CHAT_HUB_URL").map_err(|_| ConfigError::MissingVar("CHAT_HUB_URL"))?;

        let mut config = Self::new(api_base_url, hub_url);
        config.assistant_conversation_id = std::env::var("CHAT_ASSISTANT_CONVERSATION_ID").ok();
        config.page_size = env_parse("CHAT_PAGE_SIZE", DEFAULT_PAGE_SIZE);
        config.request_timeout_secs = env_parse("CHAT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS);
        config.connect_timeout_secs = env_parse("CHAT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);
        config.assistant_timeout_secs = env_parse("CHAT_ASSISTANT_TIMEOUT_SECS", DEFAULT_ASSISTANT_TIMEOUT_SECS);
        config.reconnect_base_ms = env_parse("CHAT_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS);
        config.reconnect_cap_ms = env_parse("CHAT_RECONNECT_CAP_MS", DEFAULT_RECONNECT_CAP_MS);
        config.typing_idle_ms = env_parse("CHAT_TYPING_IDLE_MS", DEFAULT_TYPING_IDLE_MS);
        Ok(config)
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
