//! Canonical data model shared by both transports.
//!
//! DESIGN
//! ======
//! The backend is inconsistent about identity types: the same conversation id
//! arrives as `42` from one endpoint and `"42"` from the other. [`ChatId`]
//! collapses both to one canonical string form so equality and hashing are
//! loose by construction — `"42"` and `42` are the same identity everywhere.
//!
//! Outbound messages are a tagged union ([`MessageEntry`]): an optimistic
//! placeholder is `Pending` and a server-acknowledged message is `Confirmed`.
//! The terminal transition is a replacement, never a field mutation, so a
//! confirmed message can never be mistaken for still-pending.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// IDENTITY
// =============================================================================

/// Canonicalized identity. JSON strings and integers collapse to the same
/// form, so `Eq`/`Hash` already implement the loose comparison the two
/// transports require.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Extract an identity from a raw JSON value. Strings and numbers are
    /// accepted; everything else (including the empty string) is not an
    /// identity.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Locally unique placeholder id for an optimistic send.
    #[must_use]
    pub fn temp() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    /// Locally generated id for a push payload that carried none. Satisfies
    /// list-key requirements only; never authoritative for dedup.
    #[must_use]
    pub fn synthetic() -> Self {
        Self(format!("synthetic-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<i64> for ChatId {
    fn from(raw: i64) -> Self {
        Self(raw.to_string())
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// A single chat communication unit in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: ChatId,
    /// True when `id` was generated locally because the payload had none.
    pub synthetic_id: bool,
    pub conversation_id: Option<ChatId>,
    pub sender_id: Option<ChatId>,
    pub content: String,
    /// Always an absolute UTC instant, whichever transport produced it.
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    pub read: bool,
    /// Raw fields the normalizer did not consume, preserved for downstream
    /// consumers.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Optimistic local send awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub temp_id: ChatId,
    /// Trimmed text shown in the message bubble.
    pub content: String,
    /// The input exactly as typed. Restored verbatim if the send fails.
    pub raw_input: String,
    pub queued_at: OffsetDateTime,
}

/// One entry in a conversation's message list.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEntry {
    Pending(PendingSend),
    Confirmed(Message),
}

impl MessageEntry {
    /// Identity used for list keys: temp id while pending, message id once
    /// confirmed.
    #[must_use]
    pub fn id(&self) -> &ChatId {
        match self {
            Self::Pending(p) => &p.temp_id,
            Self::Confirmed(m) => &m.id,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Pending(p) => &p.content,
            Self::Confirmed(m) => &m.content,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

// =============================================================================
// CONVERSATION
// =============================================================================

/// Associated job posting, when the conversation started from one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: ChatId,
    pub title: String,
}

/// A thread between the current user and one counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ChatId,
    pub partner_name: String,
    pub partner_avatar: Option<String>,
    pub last_message: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    /// Non-negative by type; raw negative counters clamp to zero.
    pub unread: u32,
    pub online: bool,
    pub job: Option<JobRef>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

// =============================================================================
// EPHEMERAL SIGNALS
// =============================================================================

/// Latest typing signal for a counterpart. Superseded by every new event; no
/// local expiry for received status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub user_id: ChatId,
    pub is_typing: bool,
}

/// Hub connection state as exposed to subscribers. Consecutive duplicate
/// notifications are possible; subscribers must be idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
