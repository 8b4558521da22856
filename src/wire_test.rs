use super::*;
use serde_json::{Value, json};

#[test]
fn invocations_encode_targets_and_arguments() {
    let conversation = ChatId::from("42");

    let frame: HubFrame = serde_json::from_str(&invoke_send_message(&conversation, "hello")).unwrap();
    assert_eq!(frame.target, SEND_MESSAGE);
    assert_eq!(frame.arguments, vec![json!("42"), json!("hello")]);

    let frame: HubFrame = serde_json::from_str(&invoke_typing(&conversation, true)).unwrap();
    assert_eq!(frame.target, SEND_TYPING_INDICATOR);
    assert_eq!(frame.arguments, vec![json!("42"), json!(true)]);

    let frame: HubFrame = serde_json::from_str(&invoke_join(&conversation)).unwrap();
    assert_eq!(frame.target, JOIN_CONVERSATION);

    let frame: HubFrame = serde_json::from_str(&invoke_leave(&conversation)).unwrap();
    assert_eq!(frame.target, LEAVE_CONVERSATION);
}

#[test]
fn decode_receive_message_keeps_raw_payload() {
    let text = r#"{"target":"ReceiveMessage","arguments":[{"id":7,"content":"hi"}]}"#;
    match decode_event(text).unwrap() {
        HubEvent::Message(payload) => {
            assert_eq!(payload.get("id").and_then(Value::as_i64), Some(7));
            assert_eq!(payload.get("content").and_then(Value::as_str), Some("hi"));
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

#[test]
fn decode_user_typing_with_numeric_id() {
    let text = r#"{"target":"UserTyping","arguments":[3,true]}"#;
    match decode_event(text).unwrap() {
        HubEvent::Typing(event) => {
            assert_eq!(event.user_id.as_str(), "3");
            assert!(event.is_typing);
        }
        other => panic!("expected Typing, got {other:?}"),
    }
}

#[test]
fn unknown_target_is_not_an_error() {
    let text = r#"{"target":"PresenceChanged","arguments":[1]}"#;
    match decode_event(text).unwrap() {
        HubEvent::Unknown { target } => assert_eq!(target, "PresenceChanged"),
        other => panic!("expected Unknown, got {other:?}"),
    }
}

#[test]
fn missing_arguments_field_defaults_to_empty() {
    let text = r#"{"target":"PresenceChanged"}"#;
    assert!(matches!(decode_event(text), Ok(HubEvent::Unknown { .. })));
}

#[test]
fn bad_arguments_are_rejected() {
    let err = decode_event(r#"{"target":"ReceiveMessage","arguments":[]}"#).unwrap_err();
    assert!(matches!(err, WireError::BadArguments { .. }));

    let err = decode_event(r#"{"target":"UserTyping","arguments":["3"]}"#).unwrap_err();
    assert!(matches!(err, WireError::BadArguments { .. }));
}

#[test]
fn invalid_json_is_rejected() {
    assert!(matches!(decode_event("not json"), Err(WireError::Json(_))));
}
