//! Hub wire protocol — JSON text frames for the push connection.
//!
//! DESIGN
//! ======
//! Every frame is `{ "target": <name>, "arguments": [...] }`. The client
//! invokes `SendMessage`, `SendTypingIndicator`, `JoinConversation`, and
//! `LeaveConversation`; the server raises `ReceiveMessage` and `UserTyping`.
//! Message payloads stay as raw `serde_json::Value` here — canonicalization
//! belongs to the normalizer, not the codec.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::model::{ChatId, TypingEvent};

pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
pub const USER_TYPING: &str = "UserTyping";
pub const SEND_MESSAGE: &str = "SendMessage";
pub const SEND_TYPING_INDICATOR: &str = "SendTypingIndicator";
pub const JOIN_CONVERSATION: &str = "JoinConversation";
pub const LEAVE_CONVERSATION: &str = "LeaveConversation";

/// Error returned by [`decode_event`].
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid frame json: {0}")]
    Json(String),
    #[error("malformed arguments for {target}")]
    BadArguments { target: String },
}

/// One frame on the hub wire, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubFrame {
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Decoded server-raised event.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// `ReceiveMessage(message)` — raw message payload.
    Message(Value),
    /// `UserTyping(userId, isTyping)`.
    Typing(TypingEvent),
    /// A target this client version does not know. Ignored upstream.
    Unknown { target: String },
}

// =============================================================================
// ENCODE
// =============================================================================

fn encode(target: &str, arguments: Vec<Value>) -> String {
    let frame = HubFrame { target: target.to_string(), arguments };
    // Serializing strings and Values cannot fail.
    serde_json::to_string(&frame).unwrap_or_default()
}

#[must_use]
pub fn invoke_send_message(conversation: &ChatId, content: &str) -> String {
    encode(SEND_MESSAGE, vec![json!(conversation.as_str()), json!(content)])
}

#[must_use]
pub fn invoke_typing(conversation: &ChatId, is_typing: bool) -> String {
    encode(SEND_TYPING_INDICATOR, vec![json!(conversation.as_str()), json!(is_typing)])
}

#[must_use]
pub fn invoke_join(conversation: &ChatId) -> String {
    encode(JOIN_CONVERSATION, vec![json!(conversation.as_str())])
}

#[must_use]
pub fn invoke_leave(conversation: &ChatId) -> String {
    encode(LEAVE_CONVERSATION, vec![json!(conversation.as_str())])
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode one inbound text frame into a [`HubEvent`].
///
/// # Errors
///
/// [`WireError::Json`] for malformed frames, [`WireError::BadArguments`] when
/// a known target carries unusable arguments.
pub fn decode_event(text: &str) -> Result<HubEvent, WireError> {
    let frame: HubFrame = serde_json::from_str(text).map_err(|e| WireError::Json(e.to_string()))?;

    match frame.target.as_str() {
        RECEIVE_MESSAGE => {
            let payload = frame
                .arguments
                .into_iter()
                .next()
                .ok_or(WireError::BadArguments { target: RECEIVE_MESSAGE.to_string() })?;
            Ok(HubEvent::Message(payload))
        }
        USER_TYPING => {
            let user_id = frame
                .arguments
                .first()
                .and_then(ChatId::from_value)
                .ok_or(WireError::BadArguments { target: USER_TYPING.to_string() })?;
            let is_typing = frame
                .arguments
                .get(1)
                .and_then(Value::as_bool)
                .ok_or(WireError::BadArguments { target: USER_TYPING.to_string() })?;
            Ok(HubEvent::Typing(TypingEvent { user_id, is_typing }))
        }
        _ => Ok(HubEvent::Unknown { target: frame.target }),
    }
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;
