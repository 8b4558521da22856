use super::*;
use serde_json::json;
use time::macros::datetime;

// =========================================================================
// timestamps
// =========================================================================

#[test]
fn timestamp_without_marker_is_utc() {
    let instant = normalize_timestamp(&json!("2024-05-01T10:30:00")).unwrap();
    assert_eq!(instant, datetime!(2024-05-01 10:30:00 UTC));
}

#[test]
fn timestamp_with_explicit_offset_is_respected() {
    let instant = normalize_timestamp(&json!("2024-05-01T10:30:00+02:00")).unwrap();
    assert_eq!(instant, datetime!(2024-05-01 08:30:00 UTC));
}

#[test]
fn timestamp_with_zulu_marker_unchanged() {
    let instant = normalize_timestamp(&json!("2024-05-01T10:30:00Z")).unwrap();
    assert_eq!(instant, datetime!(2024-05-01 10:30:00 UTC));
}

#[test]
fn timestamp_with_space_separator() {
    let instant = normalize_timestamp(&json!("2024-05-01 10:30:00")).unwrap();
    assert_eq!(instant, datetime!(2024-05-01 10:30:00 UTC));
}

#[test]
fn timestamp_with_fractional_seconds() {
    let instant = normalize_timestamp(&json!("2024-05-01T10:30:00.250")).unwrap();
    assert_eq!(instant, datetime!(2024-05-01 10:30:00.25 UTC));
}

#[test]
fn garbage_timestamp_is_none() {
    assert!(normalize_timestamp(&json!("soon")).is_none());
    assert!(normalize_timestamp(&json!("")).is_none());
    assert!(normalize_timestamp(&json!(42)).is_none());
    assert!(normalize_timestamp(&json!(null)).is_none());
}

// =========================================================================
// normalize_message
// =========================================================================

#[test]
fn message_from_camel_case_push_payload() {
    let raw = json!({
        "id": 7,
        "conversationId": "42",
        "senderId": 3,
        "content": "hello",
        "createdAt": "2024-05-01T10:30:00",
        "isRead": true,
    });

    let message = normalize_message(&raw).unwrap();
    assert_eq!(message.id.as_str(), "7");
    assert!(!message.synthetic_id);
    assert_eq!(message.conversation_id.as_ref().unwrap().as_str(), "42");
    assert_eq!(message.sender_id.as_ref().unwrap().as_str(), "3");
    assert_eq!(message.content, "hello");
    assert_eq!(message.sent_at, datetime!(2024-05-01 10:30:00 UTC));
    assert!(message.read);
}

#[test]
fn message_from_snake_case_rest_payload() {
    let raw = json!({
        "message_id": 7,
        "conversation_id": 42,
        "sender_id": 3,
        "text": "hello",
        "created_at": "2024-05-01T10:30:00Z",
        "is_read": false,
    });

    let message = normalize_message(&raw).unwrap();
    assert_eq!(message.id.as_str(), "7");
    assert_eq!(message.conversation_id.as_ref().unwrap().as_str(), "42");
    assert_eq!(message.content, "hello");
    assert!(!message.read);
}

#[test]
fn camel_case_beats_snake_case_when_both_present() {
    let raw = json!({
        "id": 1,
        "senderId": 10,
        "sender_id": 99,
        "content": "specific wins",
        "conversationId": 5,
    });

    let message = normalize_message(&raw).unwrap();
    assert_eq!(message.sender_id.as_ref().unwrap().as_str(), "10");
}

#[test]
fn specific_alias_beats_generic_id() {
    // `messageId` is more specific than the bare `id`.
    let raw = json!({ "messageId": 7, "id": 99, "content": "x" });
    let message = normalize_message(&raw).unwrap();
    assert_eq!(message.id.as_str(), "7");
}

#[test]
fn missing_id_gets_flagged_synthetic_identity() {
    let raw = json!({ "conversationId": 5, "content": "no id" });
    let message = normalize_message(&raw).unwrap();
    assert!(message.synthetic_id);
    assert!(message.id.as_str().starts_with("synthetic-"));
}

#[test]
fn unknown_fields_are_preserved() {
    let raw = json!({
        "id": 1,
        "content": "x",
        "attachmentUrl": "https://cdn.example.test/cv.pdf",
        "deliveryChannel": "push",
    });

    let message = normalize_message(&raw).unwrap();
    assert_eq!(
        message.extra.get("attachmentUrl").and_then(|v| v.as_str()),
        Some("https://cdn.example.test/cv.pdf")
    );
    assert_eq!(message.extra.get("deliveryChannel").and_then(|v| v.as_str()), Some("push"));
    assert!(!message.extra.contains_key("content"));
}

#[test]
fn non_object_input_is_none() {
    assert!(normalize_message(&json!(null)).is_none());
    assert!(normalize_message(&json!("hello")).is_none());
    assert!(normalize_message(&json!([1, 2])).is_none());
}

#[test]
fn normalization_is_a_stable_projection() {
    let raw = json!({
        "message_id": 7,
        "conversation_id": 42,
        "sender_id": 3,
        "text": "hello",
        "created_at": "2024-05-01T10:30:00",
        "is_read": true,
        "extraField": "kept",
    });
    let first = normalize_message(&raw).unwrap();

    // Re-feed the canonical output as a plausible raw payload.
    let refed = json!({
        "id": first.id.as_str(),
        "conversationId": first.conversation_id.as_ref().unwrap().as_str(),
        "senderId": first.sender_id.as_ref().unwrap().as_str(),
        "content": first.content,
        "createdAt": "2024-05-01T10:30:00Z",
        "isRead": first.read,
        "extraField": "kept",
    });
    let second = normalize_message(&refed).unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(second.sender_id, first.sender_id);
    assert_eq!(second.content, first.content);
    assert_eq!(second.sent_at, first.sent_at);
    assert_eq!(second.read, first.read);
    assert_eq!(second.extra, first.extra);
}

// =========================================================================
// normalize_conversation
// =========================================================================

#[test]
fn conversation_full_shape() {
    let raw = json!({
        "id": 42,
        "partnerName": "Dana",
        "avatarUrl": "https://cdn.example.test/d.png",
        "lastMessage": "see you",
        "lastMessageAt": "2024-05-01T10:30:00",
        "unreadCount": 3,
        "isOnline": true,
        "jobPost": { "id": 12, "title": "Line cook" },
    });

    let conversation = normalize_conversation(&raw).unwrap();
    assert_eq!(conversation.id.as_str(), "42");
    assert_eq!(conversation.partner_name, "Dana");
    assert_eq!(conversation.partner_avatar.as_deref(), Some("https://cdn.example.test/d.png"));
    assert_eq!(conversation.last_message.as_deref(), Some("see you"));
    assert_eq!(conversation.last_message_at, Some(datetime!(2024-05-01 10:30:00 UTC)));
    assert_eq!(conversation.unread, 3);
    assert!(conversation.online);
    let job = conversation.job.unwrap();
    assert_eq!(job.id.as_str(), "12");
    assert_eq!(job.title, "Line cook");
}

#[test]
fn partner_name_falls_back_to_job_title_then_generic() {
    let with_job = json!({ "id": 1, "jobTitle": "Barista", "jobId": 9 });
    assert_eq!(normalize_conversation(&with_job).unwrap().partner_name, "Barista");

    let bare = json!({ "id": 1 });
    assert_eq!(normalize_conversation(&bare).unwrap().partner_name, GENERIC_PARTNER_LABEL);
}

#[test]
fn negative_unread_clamps_to_zero() {
    let raw = json!({ "id": 1, "unreadCount": -4 });
    assert_eq!(normalize_conversation(&raw).unwrap().unread, 0);
}

#[test]
fn unread_accepts_string_counter() {
    let raw = json!({ "id": 1, "unread": "5" });
    assert_eq!(normalize_conversation(&raw).unwrap().unread, 5);
}

#[test]
fn conversation_without_identity_is_none() {
    assert!(normalize_conversation(&json!({ "partnerName": "Dana" })).is_none());
    assert!(normalize_conversation(&json!(null)).is_none());
}

#[test]
fn flat_job_fields_are_recognized() {
    let raw = json!({ "id": 1, "jobPostId": 77, "jobTitle": "Driver" });
    let job = normalize_conversation(&raw).unwrap().job.unwrap();
    assert_eq!(job.id.as_str(), "77");
    assert_eq!(job.title, "Driver");
}
