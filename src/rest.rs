//! REST boundary — [`ChatBackend`] trait and its reqwest client.
//!
//! DESIGN
//! ======
//! Sessions and the roster talk to [`ChatBackend`], never to reqwest: tests
//! inject mock backends, production injects [`ChatApi`]. The backend returns
//! raw `serde_json::Value` payloads — canonicalization is the normalizer's
//! job, and keeping raw values here means a backend shape change never
//! touches this layer.
//!
//! The API wraps list responses inconsistently: sometimes a bare array,
//! sometimes an object with the array under `conversations`, `messages`,
//! `items`, `data`, or `results`. [`extract_array`] accepts all of them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::ChatConfig;
use crate::error::{ConfigError, FetchError, SendError};
use crate::model::ChatId;
use crate::transport::TokenProvider;

/// Wrapper keys under which a response object may hide its array payload,
/// tried in order.
const LIST_KEYS: &[&str] = &["conversations", "messages", "items", "data", "results"];

/// Keys under which an unread-count response may carry its counter.
const COUNT_KEYS: &[&str] = &["unreadCount", "unread_count", "count", "total"];

// =============================================================================
// BOUNDARY
// =============================================================================

/// The REST side of the chat backend. Raw payloads out; the caller
/// normalizes.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Conversation summaries for the current user.
    async fn list_conversations(&self) -> Result<Vec<Value>, FetchError>;

    /// One page of message history, newest first.
    async fn fetch_messages(
        &self,
        conversation: &ChatId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Value>, FetchError>;

    /// Confirmed send. The returned payload is the server's view of the
    /// message, used to replace the optimistic placeholder.
    async fn send_message(&self, conversation: &ChatId, content: &str) -> Result<Value, SendError>;

    /// Create a conversation with a recipient, optionally tied to a job post.
    async fn create_conversation(
        &self,
        recipient: &ChatId,
        job_post: Option<&ChatId>,
    ) -> Result<Value, FetchError>;

    /// Mark every message in the conversation read. Best-effort at call
    /// sites; failures are logged, not retried.
    async fn mark_read(&self, conversation: &ChatId) -> Result<(), FetchError>;

    /// Total unread messages across all conversations.
    async fn unread_count(&self) -> Result<u32, FetchError>;
}

// =============================================================================
// SHAPE TOLERANCE
// =============================================================================

/// Unwrap an array from a bare array or an object wrapping one under a known
/// key.
///
/// # Errors
///
/// [`FetchError::Decode`] when neither shape matches.
pub(crate) fn extract_array(body: Value) -> Result<Vec<Value>, FetchError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => LIST_KEYS
            .iter()
            .find_map(|key| match obj.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| FetchError::Decode("no array found in response object".to_string())),
        other => Err(FetchError::Decode(format!("expected array or object, got {other}"))),
    }
}

fn extract_count(body: &Value) -> Option<u32> {
    let number = match body {
        Value::Number(n) => n.as_u64(),
        Value::Object(obj) => COUNT_KEYS
            .iter()
            .find_map(|key| obj.get(*key))
            .and_then(Value::as_u64),
        _ => None,
    };
    number.and_then(|n| u32::try_from(n).ok())
}

/// Best-effort human-readable message from an error body. Falls back to the
/// raw text.
fn body_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .as_ref()
        .and_then(|v| {
            ["message", "error", "detail", "title"]
                .iter()
                .find_map(|key| v.get(key))
                .and_then(Value::as_str)
        })
        .map_or_else(|| text.to_string(), str::to_string)
}

fn fetch_error(e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

fn send_error(e: &reqwest::Error) -> SendError {
    if e.is_timeout() {
        SendError::Timeout
    } else {
        SendError::Network(e.to_string())
    }
}

/// Body of a successful send. Some deployments answer a send with an empty
/// 2xx body; the send still completed, so that maps to `Value::Null` and the
/// session synthesizes the confirmation. Only a non-empty, unparseable body
/// is an error.
fn send_payload(text: &str) -> Result<Value, SendError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| SendError::Network(e.to_string()))
}

// =============================================================================
// CLIENT
// =============================================================================

/// Production [`ChatBackend`] over HTTP. Bearer token injected per request
/// from the shared [`TokenProvider`]; an absent token sends the request
/// unauthenticated — the provider is the authority on sign-in state.
pub struct ChatApi {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    assistant_conversation_id: Option<ChatId>,
    assistant_timeout: Duration,
}

impl ChatApi {
    /// # Errors
    ///
    /// [`ConfigError::HttpClient`] when the underlying client cannot be
    /// built.
    pub fn new(config: &ChatConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            tokens,
            assistant_conversation_id: config
                .assistant_conversation_id
                .as_deref()
                .map(ChatId::from),
            assistant_timeout: Duration::from_secs(config.assistant_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.access_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, FetchError> {
        let status = response.status();
        let text = response.text().await.map_err(|e| fetch_error(&e))?;
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16(), message: body_message(&text) });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for ChatApi {
    async fn list_conversations(&self) -> Result<Vec<Value>, FetchError> {
        let request = self.http.get(self.url("/api/chat/conversations"));
        let response = self.authorize(request).await.send().await.map_err(|e| fetch_error(&e))?;
        extract_array(Self::read_json(response).await?)
    }

    async fn fetch_messages(
        &self,
        conversation: &ChatId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Value>, FetchError> {
        let request = self
            .http
            .get(self.url(&format!("/api/chat/conversations/{conversation}/messages")))
            .query(&[("page", page), ("pageSize", page_size)]);
        let response = self.authorize(request).await.send().await.map_err(|e| fetch_error(&e))?;
        extract_array(Self::read_json(response).await?)
    }

    async fn send_message(&self, conversation: &ChatId, content: &str) -> Result<Value, SendError> {
        let mut request = self
            .http
            .post(self.url(&format!("/api/chat/conversations/{conversation}/messages")))
            .json(&json!({ "content": content }));

        // The AI assistant conversation answers synchronously and can take
        // far longer than a human-to-human send.
        if self.assistant_conversation_id.as_ref() == Some(conversation) {
            request = request.timeout(self.assistant_timeout);
        }

        let response = self.authorize(request).await.send().await.map_err(|e| send_error(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| send_error(&e))?;
        if !status.is_success() {
            return Err(SendError::Rejected { status: status.as_u16(), message: body_message(&text) });
        }
        send_payload(&text)
    }

    async fn create_conversation(
        &self,
        recipient: &ChatId,
        job_post: Option<&ChatId>,
    ) -> Result<Value, FetchError> {
        let mut body = json!({ "recipientId": recipient.as_str() });
        if let Some(job) = job_post {
            body["jobPostId"] = json!(job.as_str());
        }
        let request = self.http.post(self.url("/api/chat/conversations")).json(&body);
        let response = self.authorize(request).await.send().await.map_err(|e| fetch_error(&e))?;
        Self::read_json(response).await
    }

    async fn mark_read(&self, conversation: &ChatId) -> Result<(), FetchError> {
        let request = self
            .http
            .post(self.url(&format!("/api/chat/conversations/{conversation}/read")));
        let response = self.authorize(request).await.send().await.map_err(|e| fetch_error(&e))?;
        Self::read_json(response).await?;
        debug!(%conversation, "rest: conversation marked read");
        Ok(())
    }

    async fn unread_count(&self) -> Result<u32, FetchError> {
        let request = self.http.get(self.url("/api/chat/unread-count"));
        let response = self.authorize(request).await.send().await.map_err(|e| fetch_error(&e))?;
        let body = Self::read_json(response).await?;
        extract_count(&body)
            .ok_or_else(|| FetchError::Decode("no unread counter in response".to_string()))
    }
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
