use std::{cmp::Ordering, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::content_type;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(TopicId);
id_newtype!(UserId);

/// Generates a client-side idempotency key for an outbound message.
pub fn new_chat_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatLogStatus {
    Sending,
    Sent,
    #[default]
    Received,
    Read,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub placeholder: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbnail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub duration: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub width: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub height: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<UserId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mention_all: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unreadable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Content {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    pub fn with_text(content_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// A message is rendered to the user only when it has a real content type,
    /// is not a control entry and has not been flagged unreadable.
    pub fn is_readable(&self) -> bool {
        !self.content_type.is_empty() && !self.is_control() && !self.unreadable
    }

    /// Control entries mutate an earlier message instead of being shown.
    pub fn is_control(&self) -> bool {
        self.content_type == content_type::RECALL || self.content_type == content_type::UPDATE_EXTRA
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLog {
    pub topic_id: TopicId,
    pub chat_id: String,
    pub seq: u64,
    pub sender_id: UserId,
    pub content: Content,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ChatLogStatus,
    #[serde(default)]
    pub recall: bool,
    #[serde(default)]
    pub sent_by_me: bool,
}

impl ChatLog {
    pub fn is_readable(&self) -> bool {
        self.content.is_readable()
    }

    /// Order of a topic's message list: `seq`, then `created_at`, then `chat_id`.
    pub fn order_cmp(&self, other: &ChatLog) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.chat_id.cmp(&other.chat_id))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: TopicId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub owner_id: UserId,
    #[serde(default)]
    pub admins: Vec<UserId>,
    #[serde(default)]
    pub attendee_id: UserId,
    #[serde(default)]
    pub members: u32,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub last_seq: u64,
    #[serde(default)]
    pub notice: Option<TopicNotice>,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub extra: Option<Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicNotice {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub publisher: UserId,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    #[serde(default, rename = "type")]
    pub tag_type: String,
    #[serde(default)]
    pub label: String,
}

/// Per-topic summary shown in a conversation list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub topic_id: TopicId,
    #[serde(default)]
    pub owner_id: UserId,
    #[serde(default)]
    pub attendee_id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub last_seq: u64,
    #[serde(default)]
    pub last_read_seq: u64,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread: u64,
    #[serde(default)]
    pub last_message: Option<Content>,
    #[serde(default)]
    pub last_message_seq: u64,
    #[serde(default)]
    pub last_message_chat_id: String,
    #[serde(default)]
    pub last_sender_id: UserId,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub extra: Option<Value>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub mute: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub extra: Option<Value>,
}
