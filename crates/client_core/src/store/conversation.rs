//! Pure aggregation of a topic's event stream into a [`Conversation`] snapshot.

use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{ChatLog, Content, Conversation, Tag, Topic, UserId},
    protocol::content_type,
};
use tracing::warn;

/// Payload of a `conversation.update` control message, carried in `content.extra`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConversationPatch {
    extra: Option<Value>,
    tags: Option<Vec<Tag>>,
    remark: Option<String>,
    sticky: Option<bool>,
    mute: Option<bool>,
}

/// Payload of a `topic.update` control message, carried in `content.extra`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TopicPatch {
    name: Option<String>,
    icon: Option<String>,
    extra: Option<Value>,
}

fn decode_patch<T: Default + for<'de> Deserialize<'de>>(content: &Content) -> T {
    let Some(raw) = content.extra.clone() else {
        return T::default();
    };
    match serde_json::from_value(raw) {
        Ok(patch) => patch,
        Err(err) => {
            warn!(content_type = %content.content_type, "store: ignoring malformed patch: {err}");
            T::default()
        }
    }
}

/// Fresh snapshot from the topic descriptor, keeping the per-user state of
/// `previous` (read position, last message, tags, flags).
pub fn build_from_topic(topic: &Topic, previous: Option<&Conversation>) -> Conversation {
    let mut conversation = previous.cloned().unwrap_or_else(|| Conversation {
        topic_id: topic.id.clone(),
        created_at: topic.created_at,
        extra: topic.extra.clone(),
        ..Conversation::default()
    });
    conversation.owner_id = topic.owner_id.clone();
    conversation.attendee_id = topic.attendee_id.clone();
    conversation.name = topic.name.clone();
    conversation.icon = topic.icon.clone();
    conversation.multiple = topic.multiple;
    conversation.source = topic.source.clone();
    conversation.last_seq = conversation.last_seq.max(topic.last_seq);
    if conversation.updated_at.is_none() {
        conversation.updated_at = topic.updated_at;
    }
    conversation
}

/// Applies a `topic.update` / `topic.change.owner` control message to the
/// cached descriptor.
pub fn apply_topic_event(topic: &mut Topic, content: &Content) {
    match content.content_type.as_str() {
        content_type::TOPIC_UPDATE => {
            let patch: TopicPatch = decode_patch(content);
            if let Some(name) = patch.name {
                topic.name = name;
            }
            if let Some(icon) = patch.icon {
                topic.icon = icon;
            }
            if patch.extra.is_some() {
                topic.extra = patch.extra;
            }
        }
        content_type::TOPIC_CHANGE_OWNER if !content.text.is_empty() => {
            topic.owner_id = UserId::new(content.text.clone());
        }
        _ => {}
    }
}

/// Merges one log into the conversation; `None` means the conversation was
/// removed by the server.
pub fn merge_chat_log(
    previous: Option<&Conversation>,
    topic: &Topic,
    log: &ChatLog,
    has_read: bool,
) -> Option<Conversation> {
    let content = &log.content;
    if content.content_type == content_type::CONVERSATION_REMOVED {
        return None;
    }

    let previous_message_seq = previous.map(|c| c.last_message_seq).unwrap_or(0);
    let mut conversation = build_from_topic(topic, previous);
    conversation.last_seq = conversation.last_seq.max(log.seq);

    match content.content_type.as_str() {
        content_type::TOPIC_CHANGE_OWNER | content_type::TOPIC_UPDATE => {
            let mut patched = topic.clone();
            apply_topic_event(&mut patched, content);
            conversation.owner_id = patched.owner_id;
            conversation.name = patched.name;
            conversation.icon = patched.icon;
            if content.content_type == content_type::TOPIC_UPDATE && patched.extra.is_some() {
                conversation.extra = patched.extra;
            }
        }
        content_type::CONVERSATION_UPDATE => {
            let patch: ConversationPatch = decode_patch(content);
            if patch.extra.is_some() {
                conversation.extra = patch.extra;
            }
            if let Some(tags) = patch.tags {
                conversation.tags = tags;
            }
            if patch.remark.is_some() {
                conversation.remark = patch.remark;
            }
            if let Some(sticky) = patch.sticky {
                conversation.sticky = sticky;
            }
            if let Some(mute) = patch.mute {
                conversation.mute = mute;
            }
        }
        content_type::UPDATE_EXTRA => {
            if conversation.last_message_chat_id == content.text {
                if let Some(last) = conversation.last_message.as_mut() {
                    last.extra = content.extra.clone();
                }
            }
        }
        _ => {}
    }

    if !log.chat_id.is_empty() && log.is_readable() && log.seq >= conversation.last_read_seq {
        conversation.unread += 1;
    }
    if has_read {
        conversation.last_read_seq = log.seq;
        conversation.last_read_at = Some(log.created_at);
        conversation.unread = 0;
    }

    let promotes = !matches!(
        content.content_type.as_str(),
        content_type::UPDATE_EXTRA | content_type::CONVERSATION_UPDATE
    );
    if promotes && log.seq > previous_message_seq {
        conversation.last_message = Some(content.clone());
        conversation.last_message_seq = log.seq;
        conversation.last_message_chat_id = log.chat_id.clone();
        conversation.last_sender_id = log.sender_id.clone();
        conversation.last_message_at = Some(log.created_at);
    }
    conversation.updated_at = conversation.updated_at.max(Some(log.created_at));

    Some(conversation)
}

/// Explicit read mark up to `seq`.
pub fn mark_read(
    conversation: &Conversation,
    seq: u64,
    at: chrono::DateTime<chrono::Utc>,
) -> Conversation {
    let mut updated = conversation.clone();
    updated.last_read_seq = updated.last_read_seq.max(seq);
    updated.last_read_at = Some(at);
    updated.unread = 0;
    updated
}

/// Unread count of a server-provided conversation list item.
pub fn recompute_unread(conversation: &mut Conversation) {
    let head = if conversation.last_message_seq > 0 {
        conversation.last_message_seq
    } else {
        conversation.last_seq
    };
    conversation.unread = head.saturating_sub(conversation.last_read_seq);
}
