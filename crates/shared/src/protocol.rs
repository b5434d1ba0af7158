use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChatLog, Content, Conversation, TopicId, UserId, UserProfile};

pub mod content_type {
    pub const TEXT: &str = "text";
    pub const IMAGE: &str = "image";
    pub const VIDEO: &str = "video";
    pub const VOICE: &str = "voice";
    pub const FILE: &str = "file";
    pub const LOCATION: &str = "location";
    pub const LINK: &str = "link";
    pub const RECALL: &str = "recall";
    pub const UPDATE_EXTRA: &str = "update.extra";
    pub const TOPIC_JOIN: &str = "topic.join";
    pub const TOPIC_UPDATE: &str = "topic.update";
    pub const TOPIC_CHANGE_OWNER: &str = "topic.change.owner";
    pub const CONVERSATION_UPDATE: &str = "conversation.update";
    pub const CONVERSATION_REMOVED: &str = "conversation.removed";
    /// Replacement content type for a message after a successful recall.
    pub const RECALLED: &str = "recalled";
}

pub mod code {
    pub const OK: u16 = 200;
    pub const NOT_IMPLEMENTED: u16 = 501;
}

/// Frame discriminator carried in the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FrameType {
    #[default]
    Nop,
    Chat,
    Typing,
    Read,
    Resp,
    Kickout,
    System,
    Other(String),
}

impl FrameType {
    pub fn as_str(&self) -> &str {
        match self {
            FrameType::Nop => "nop",
            FrameType::Chat => "chat",
            FrameType::Typing => "typing",
            FrameType::Read => "read",
            FrameType::Resp => "resp",
            FrameType::Kickout => "kickout",
            FrameType::System => "system",
            FrameType::Other(value) => value,
        }
    }
}

impl From<&str> for FrameType {
    fn from(value: &str) -> Self {
        match value {
            "nop" | "ping" | "" => FrameType::Nop,
            "chat" => FrameType::Chat,
            "typing" => FrameType::Typing,
            "read" => FrameType::Read,
            "resp" => FrameType::Resp,
            "kickout" => FrameType::Kickout,
            "system" => FrameType::System,
            other => FrameType::Other(other.to_string()),
        }
    }
}

impl Serialize for FrameType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FrameType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(FrameType::from(raw.as_str()))
    }
}

/// JSON frame exchanged over the persistent socket in both directions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type", default)]
    pub frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<TopicId>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: u64,
    /// Sender of the frame; some servers name it `senderId`.
    #[serde(default, alias = "senderId", skip_serializing_if = "Option::is_none")]
    pub attendee: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendee_profile: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Frame {
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            ..Self::default()
        }
    }

    pub fn nop() -> Self {
        Self::new(FrameType::Nop)
    }

    pub fn chat(topic_id: TopicId, chat_id: String, content: Content) -> Self {
        Self {
            frame_type: FrameType::Chat,
            chat_id: Some(chat_id),
            topic_id: Some(topic_id),
            content: Some(content),
            created_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn typing(topic_id: TopicId) -> Self {
        Self {
            frame_type: FrameType::Typing,
            topic_id: Some(topic_id),
            ..Self::default()
        }
    }

    pub fn read(topic_id: TopicId, last_seq: u64) -> Self {
        Self {
            frame_type: FrameType::Read,
            topic_id: Some(topic_id),
            seq: last_seq,
            ..Self::default()
        }
    }

    /// Acknowledgement of an inbound frame echoing its `chatId`.
    pub fn response(request: &Frame, code: u16) -> Self {
        Self {
            frame_type: FrameType::Resp,
            chat_id: request.chat_id.clone(),
            topic_id: request.topic_id.clone(),
            seq: request.seq,
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Responses without an explicit code are successful.
    pub fn is_ok(&self) -> bool {
        self.code.unwrap_or(code::OK) == code::OK
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListPage {
    #[serde(default)]
    pub items: Vec<Conversation>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Raw history entry as returned by the backend before normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogItem {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub sender_id: UserId,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recall: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogPage {
    #[serde(default)]
    pub items: Vec<ChatLogItem>,
    #[serde(default)]
    pub has_more: bool,
}

/// History page handed back to callers of the message store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessagePage {
    pub items: Vec<ChatLog>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogQuery {
    pub last_seq: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveMessagesRequest {
    pub ids: Vec<String>,
}
