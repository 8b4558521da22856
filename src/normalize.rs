//! Payload normalization — raw transport shapes → canonical model.
//!
//! DESIGN
//! ======
//! The REST API and the push hub disagree on field naming (camelCase vs
//! snake_case, `content` vs `text`) and on timestamp formatting. Everything
//! inbound passes through here exactly once before touching session state.
//!
//! Alias precedence is fixed and deterministic: the most specific camelCase
//! alias first, its snake_case twin next, generic fallbacks last. Any present
//! value beats none.
//!
//! TIMESTAMPS
//! ==========
//! The backend emits UTC wall-clock values and usually omits the `Z` marker.
//! A raw timestamp without an explicit offset gets `Z` appended before
//! parsing. This is a load-bearing contract with the backend, pinned by
//! tests — not derived from any authoritative offset. Explicit offsets are
//! respected, never overwritten.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::model::{ChatId, Conversation, JobRef, Message};

/// Label used when no counterpart name is derivable from any known field.
pub const GENERIC_PARTNER_LABEL: &str = "Unknown";

// =============================================================================
// ALIAS TABLES
// =============================================================================

const MESSAGE_ID: &[&str] = &["messageId", "message_id", "id", "Id"];
const MESSAGE_CONVERSATION: &[&str] = &["conversationId", "conversation_id", "chatId", "chat_id", "ConversationId"];
const MESSAGE_SENDER: &[&str] = &["senderId", "sender_id", "userId", "user_id", "from"];
const MESSAGE_CONTENT: &[&str] = &["content", "text", "message", "body"];
const MESSAGE_SENT_AT: &[&str] = &["createdAt", "created_at", "sentAt", "sent_at", "timestamp"];
const MESSAGE_READ: &[&str] = &["isRead", "is_read", "read"];

const CONVERSATION_ID: &[&str] = &["conversationId", "conversation_id", "id", "Id"];
const CONVERSATION_NAME: &[&str] =
    &["partnerName", "partner_name", "userName", "user_name", "fullName", "full_name", "name"];
const CONVERSATION_AVATAR: &[&str] =
    &["partnerAvatar", "partner_avatar", "avatarUrl", "avatar_url", "photoUrl", "photo_url", "avatar"];
const CONVERSATION_PREVIEW: &[&str] = &["lastMessage", "last_message", "lastMessageText", "last_message_text", "preview"];
const CONVERSATION_PREVIEW_AT: &[&str] =
    &["lastMessageAt", "last_message_at", "lastMessageTime", "last_message_time", "updatedAt", "updated_at"];
const CONVERSATION_UNREAD: &[&str] = &["unreadCount", "unread_count", "unread"];
const CONVERSATION_ONLINE: &[&str] = &["isOnline", "is_online", "online"];
const CONVERSATION_JOB: &[&str] = &["jobPost", "job_post", "job"];
const CONVERSATION_JOB_ID: &[&str] = &["jobPostId", "job_post_id", "jobId", "job_id"];
const CONVERSATION_JOB_TITLE: &[&str] = &["jobTitle", "job_title"];
const JOB_ID: &[&str] = &["id", "jobPostId", "job_post_id"];
const JOB_TITLE: &[&str] = &["title", "jobTitle", "job_title", "name"];

/// First present, non-null value among the aliases, in precedence order.
fn field<'a>(raw: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|key| raw.get(*key).filter(|v| !v.is_null()))
}

fn consumed(aliases: &[&[&str]], key: &str) -> bool {
    aliases.iter().any(|table| table.contains(&key))
}

/// Raw fields not mapped to a canonical attribute, preserved as-is.
fn leftover(raw: &Map<String, Value>, aliases: &[&[&str]]) -> Map<String, Value> {
    raw.iter()
        .filter(|(key, _)| !consumed(aliases, key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

fn has_explicit_offset(raw: &str) -> bool {
    if raw.ends_with('Z') || raw.ends_with('z') {
        return true;
    }
    // An offset sign can only appear in the time portion; the date portion
    // always contains '-'.
    let time_part = raw.split_once('T').map_or("", |(_, t)| t);
    time_part.contains('+') || time_part.contains('-')
}

/// Parse a raw timestamp into a UTC instant. Values without an explicit
/// offset are treated as UTC by appending `Z`.
#[must_use]
pub fn normalize_timestamp(value: &Value) -> Option<OffsetDateTime> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }

    // Tolerate a space separator between date and time.
    let mut candidate = match raw.split_once(' ') {
        Some((date, rest)) if !raw.contains('T') => format!("{date}T{rest}"),
        _ => raw.to_string(),
    };
    if !has_explicit_offset(&candidate) {
        candidate.push('Z');
    }

    OffsetDateTime::parse(&candidate, &Rfc3339)
        .ok()
        .map(|instant| instant.to_offset(time::UtcOffset::UTC))
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Map an arbitrary raw message payload into the canonical [`Message`].
///
/// Total and deterministic for object input; `None` only when `raw` is not an
/// object. A payload without any recognizable identity gets a synthetic id
/// (flagged, never authoritative). Unparseable timestamps map to the Unix
/// epoch so equal inputs always produce equal outputs.
#[must_use]
pub fn normalize_message(raw: &Value) -> Option<Message> {
    let obj = raw.as_object()?;

    let (id, synthetic_id) = match field(obj, MESSAGE_ID).and_then(ChatId::from_value) {
        Some(id) => (id, false),
        None => (ChatId::synthetic(), true),
    };

    const CONSUMED: &[&[&str]] =
        &[MESSAGE_ID, MESSAGE_CONVERSATION, MESSAGE_SENDER, MESSAGE_CONTENT, MESSAGE_SENT_AT, MESSAGE_READ];

    Some(Message {
        id,
        synthetic_id,
        conversation_id: field(obj, MESSAGE_CONVERSATION).and_then(ChatId::from_value),
        sender_id: field(obj, MESSAGE_SENDER).and_then(ChatId::from_value),
        content: field(obj, MESSAGE_CONTENT)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        sent_at: field(obj, MESSAGE_SENT_AT)
            .and_then(normalize_timestamp)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        read: field(obj, MESSAGE_READ).and_then(Value::as_bool).unwrap_or(false),
        extra: leftover(obj, CONSUMED),
    })
}

// =============================================================================
// CONVERSATIONS
// =============================================================================

fn normalize_job(obj: &Map<String, Value>) -> Option<JobRef> {
    // Nested job object first, flat id/title pair as fallback.
    if let Some(job_obj) = field(obj, CONVERSATION_JOB).and_then(Value::as_object) {
        let id = field(job_obj, JOB_ID).and_then(ChatId::from_value)?;
        let title = field(job_obj, JOB_TITLE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Some(JobRef { id, title });
    }

    let id = field(obj, CONVERSATION_JOB_ID).and_then(ChatId::from_value)?;
    let title = field(obj, CONVERSATION_JOB_TITLE)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(JobRef { id, title })
}

fn unread_count(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .map_or(0, |count| u32::try_from(count.max(0)).unwrap_or(u32::MAX)),
        Some(Value::String(s)) => s.parse::<u32>().unwrap_or(0),
        _ => 0,
    }
}

/// Map a raw conversation summary into the canonical [`Conversation`].
///
/// `None` when `raw` is not an object or carries no recognizable identity
/// field. Counterpart name falls back to the job title, then to
/// [`GENERIC_PARTNER_LABEL`].
#[must_use]
pub fn normalize_conversation(raw: &Value) -> Option<Conversation> {
    let obj = raw.as_object()?;
    let id = field(obj, CONVERSATION_ID).and_then(ChatId::from_value)?;

    let job = normalize_job(obj);
    let partner_name = field(obj, CONVERSATION_NAME)
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            job.as_ref()
                .map(|j| j.title.clone())
                .filter(|title| !title.trim().is_empty())
        })
        .unwrap_or_else(|| GENERIC_PARTNER_LABEL.to_string());

    const CONSUMED: &[&[&str]] = &[
        CONVERSATION_ID,
        CONVERSATION_NAME,
        CONVERSATION_AVATAR,
        CONVERSATION_PREVIEW,
        CONVERSATION_PREVIEW_AT,
        CONVERSATION_UNREAD,
        CONVERSATION_ONLINE,
        CONVERSATION_JOB,
        CONVERSATION_JOB_ID,
        CONVERSATION_JOB_TITLE,
    ];

    Some(Conversation {
        id,
        partner_name,
        partner_avatar: field(obj, CONVERSATION_AVATAR)
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string),
        last_message: field(obj, CONVERSATION_PREVIEW)
            .and_then(Value::as_str)
            .map(str::to_string),
        last_message_at: field(obj, CONVERSATION_PREVIEW_AT).and_then(normalize_timestamp),
        unread: unread_count(field(obj, CONVERSATION_UNREAD)),
        online: field(obj, CONVERSATION_ONLINE)
            .and_then(Value::as_bool)
            .unwrap_or(false),
        job,
        extra: leftover(obj, CONSUMED),
    })
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
