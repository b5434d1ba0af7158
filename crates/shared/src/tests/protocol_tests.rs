use serde_json::json;

use crate::{
    domain::{Content, TopicId, UserId},
    protocol::{code, content_type, Frame, FrameType},
};

#[test]
fn decodes_inbound_chat_frame() {
    let raw = json!({
        "type": "chat",
        "chatId": "c-1",
        "topicId": "t-1",
        "seq": 6,
        "attendee": "bob",
        "content": { "type": "text", "text": "hello", "mentions": ["alice"] },
        "createdAt": "2024-05-01T10:00:00Z"
    });

    let frame: Frame = serde_json::from_value(raw).expect("decode");
    assert_eq!(frame.frame_type, FrameType::Chat);
    assert_eq!(frame.chat_id(), Some("c-1"));
    assert_eq!(frame.topic_id, Some(TopicId::from("t-1")));
    assert_eq!(frame.seq, 6);
    assert_eq!(frame.attendee, Some(UserId::from("bob")));
    let content = frame.content.expect("content");
    assert_eq!(content.text, "hello");
    assert_eq!(content.mentions, vec![UserId::from("alice")]);
}

#[test]
fn sender_id_is_accepted_for_attendee() {
    let frame: Frame = serde_json::from_value(json!({
        "type": "chat",
        "chatId": "c-2",
        "topicId": "t-1",
        "seq": 7,
        "senderId": "carol"
    }))
    .expect("decode");

    assert_eq!(frame.attendee, Some(UserId::from("carol")));
    let encoded = serde_json::to_value(&frame).expect("encode");
    assert_eq!(encoded["attendee"], "carol");
}

#[test]
fn unknown_frame_type_is_preserved() {
    let frame: Frame = serde_json::from_value(json!({ "type": "presence", "chatId": "x" }))
        .expect("decode");
    assert_eq!(frame.frame_type, FrameType::Other("presence".into()));
    assert_eq!(frame.frame_type.as_str(), "presence");
}

#[test]
fn response_frame_echoes_chat_id_and_code() {
    let request = Frame::chat(
        TopicId::from("t-1"),
        "c-9".into(),
        Content::with_text(content_type::TEXT, "hi"),
    );
    let response = Frame::response(&request, code::NOT_IMPLEMENTED);
    let encoded = serde_json::to_value(&response).expect("encode");
    assert_eq!(encoded["type"], "resp");
    assert_eq!(encoded["chatId"], "c-9");
    assert_eq!(encoded["code"], 501);
    assert!(encoded.get("content").is_none());
}

#[test]
fn empty_chat_id_is_treated_as_missing() {
    let frame: Frame = serde_json::from_value(json!({ "type": "typing", "chatId": "" }))
        .expect("decode");
    assert_eq!(frame.chat_id(), None);
}

#[test]
fn control_content_is_not_readable() {
    assert!(Content::with_text(content_type::TEXT, "hi").is_readable());
    assert!(!Content::with_text(content_type::RECALL, "c-1").is_readable());
    assert!(!Content::with_text(content_type::UPDATE_EXTRA, "c-1").is_readable());
    assert!(!Content::new("").is_readable());

    let mut hidden = Content::with_text(content_type::TEXT, "hi");
    hidden.unreadable = true;
    assert!(!hidden.is_readable());
}
