//! Outbound chat commands: content builders and the send-and-confirm flow.

use serde_json::{json, Value};
use shared::{
    domain::{new_chat_id, ChatLog, Content, Conversation, Topic, TopicId, UserId},
    protocol::{content_type, Frame, MessagePage},
};
use tracing::{debug, warn};

use crate::{
    connection::{RequestHooks, SendStatus},
    error::{ClientError, RequestError},
    store::MergeOutcome,
    ChatClient,
};

/// Mentions, reply and extra payload shared by every outbound content type.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub mentions: Vec<UserId>,
    pub mention_all: bool,
    pub reply: Option<String>,
    pub extra: Option<Value>,
}

impl SendOptions {
    pub fn mention(mut self, user_id: impl Into<String>) -> Self {
        self.mentions.push(UserId::new(user_id));
        self
    }

    pub fn reply_to(mut self, chat_id: impl Into<String>) -> Self {
        self.reply = Some(chat_id.into());
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    fn apply(self, mut content: Content) -> Content {
        content.mentions = self.mentions;
        content.mention_all = self.mention_all;
        if let Some(reply) = self.reply {
            content.reply = reply;
        }
        if self.extra.is_some() {
            content.extra = self.extra;
        }
        content
    }
}

pub fn text_content(text: impl Into<String>) -> Content {
    Content::with_text(content_type::TEXT, text)
}

pub fn image_content(url: impl Into<String>, thumbnail: impl Into<String>, width: u64, height: u64, size: u64) -> Content {
    Content {
        thumbnail: thumbnail.into(),
        width,
        height,
        size,
        ..Content::with_text(content_type::IMAGE, url)
    }
}

pub fn voice_content(url: impl Into<String>, duration_secs: u64, size: u64) -> Content {
    Content {
        duration: duration_secs.to_string(),
        size,
        ..Content::with_text(content_type::VOICE, url)
    }
}

pub fn video_content(url: impl Into<String>, thumbnail: impl Into<String>, duration_secs: u64, size: u64) -> Content {
    Content {
        thumbnail: thumbnail.into(),
        duration: duration_secs.to_string(),
        size,
        ..Content::with_text(content_type::VIDEO, url)
    }
}

/// `placeholder` carries the file name shown before download.
pub fn file_content(url: impl Into<String>, file_name: impl Into<String>, size: u64) -> Content {
    Content {
        placeholder: file_name.into(),
        size,
        ..Content::with_text(content_type::FILE, url)
    }
}

pub fn link_content(url: impl Into<String>, title: impl Into<String>) -> Content {
    Content {
        placeholder: title.into(),
        ..Content::with_text(content_type::LINK, url)
    }
}

pub fn location_content(address: impl Into<String>, latitude: f64, longitude: f64) -> Content {
    Content {
        extra: Some(json!({ "latitude": latitude, "longitude": longitude })),
        ..Content::with_text(content_type::LOCATION, address)
    }
}

impl ChatClient {
    /// Renders a provisional `Sending` copy, sends the chat frame and settles
    /// the copy as `Sent` or `Failed` with the outcome.
    pub async fn do_send_message(
        &self,
        topic_id: &TopicId,
        content: Content,
        options: SendOptions,
        hooks: RequestHooks,
    ) -> Result<ChatLog, ClientError> {
        let topic = self.topic_for_send(topic_id).await;
        let content = options.apply(content);
        let chat_id = new_chat_id();

        let provisional = self.store.save_outgoing(topic_id, &chat_id, content.clone()).await;
        let frame = Frame::chat(topic_id.clone(), chat_id.clone(), content);

        match self.connection.send_and_wait_response(frame, hooks).await {
            Ok(response) if response.is_ok() => {
                if let Some(MergeOutcome::Updated(conversation)) =
                    self.store.confirm_outgoing(&topic, &chat_id, &response).await
                {
                    self.handler.on_conversation_updated(&conversation);
                }
                Ok(self
                    .store
                    .get_message(topic_id, &chat_id)
                    .await
                    .unwrap_or(provisional))
            }
            Ok(response) => {
                self.store.fail_outgoing(topic_id, &chat_id).await;
                Err(RequestError::Rejected {
                    code: response.code.unwrap_or_default(),
                    message: response.message.unwrap_or_default(),
                }
                .into())
            }
            Err(err) => {
                warn!(topic_id = %topic_id, %chat_id, "commands: send failed: {err}");
                self.store.fail_outgoing(topic_id, &chat_id).await;
                Err(err.into())
            }
        }
    }

    /// A send must not be blocked by a failed descriptor lookup.
    async fn topic_for_send(&self, topic_id: &TopicId) -> Topic {
        match self.store.get_topic(topic_id).await {
            Ok(topic) => topic,
            Err(err) => {
                debug!(topic_id = %topic_id, "commands: sending without topic descriptor: {err}");
                Topic {
                    id: topic_id.clone(),
                    ..Topic::default()
                }
            }
        }
    }

    pub async fn do_send_text(
        &self,
        topic_id: &TopicId,
        text: impl Into<String>,
        options: SendOptions,
    ) -> Result<ChatLog, ClientError> {
        self.do_send_message(topic_id, text_content(text), options, RequestHooks::new())
            .await
    }

    pub async fn do_send_image(
        &self,
        topic_id: &TopicId,
        url: impl Into<String>,
        thumbnail: impl Into<String>,
        width: u64,
        height: u64,
        size: u64,
    ) -> Result<ChatLog, ClientError> {
        let content = image_content(url, thumbnail, width, height, size);
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    pub async fn do_send_voice(
        &self,
        topic_id: &TopicId,
        url: impl Into<String>,
        duration_secs: u64,
        size: u64,
    ) -> Result<ChatLog, ClientError> {
        let content = voice_content(url, duration_secs, size);
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    pub async fn do_send_video(
        &self,
        topic_id: &TopicId,
        url: impl Into<String>,
        thumbnail: impl Into<String>,
        duration_secs: u64,
        size: u64,
    ) -> Result<ChatLog, ClientError> {
        let content = video_content(url, thumbnail, duration_secs, size);
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    pub async fn do_send_file(
        &self,
        topic_id: &TopicId,
        url: impl Into<String>,
        file_name: impl Into<String>,
        size: u64,
    ) -> Result<ChatLog, ClientError> {
        let content = file_content(url, file_name, size);
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    pub async fn do_send_link(
        &self,
        topic_id: &TopicId,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<ChatLog, ClientError> {
        let content = link_content(url, title);
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    pub async fn do_send_location(
        &self,
        topic_id: &TopicId,
        address: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<ChatLog, ClientError> {
        let content = location_content(address, latitude, longitude);
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    /// Asks the server to retract `chat_id`; the visible effect arrives as a
    /// `recall` control message.
    pub async fn do_recall(&self, topic_id: &TopicId, chat_id: &str) -> Result<ChatLog, ClientError> {
        let content = Content::with_text(content_type::RECALL, chat_id);
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    /// Replaces the `extra` payload of an earlier message.
    pub async fn do_update_extra(
        &self,
        topic_id: &TopicId,
        chat_id: &str,
        extra: Value,
    ) -> Result<ChatLog, ClientError> {
        let content = Content {
            extra: Some(extra),
            ..Content::with_text(content_type::UPDATE_EXTRA, chat_id)
        };
        self.do_send_message(topic_id, content, SendOptions::default(), RequestHooks::new())
            .await
    }

    /// Fire-and-forget typing indicator; dropped while disconnected.
    pub async fn do_typing(&self, topic_id: &TopicId) -> Result<SendStatus, ClientError> {
        Ok(self
            .connection
            .do_send_request(Frame::typing(topic_id.clone()), false)
            .await?)
    }

    /// Marks the conversation read locally and tells the server, queueing the
    /// receipt while disconnected. `seq == 0` reads everything known.
    pub async fn do_read(&self, topic_id: &TopicId, seq: u64) -> Result<Conversation, ClientError> {
        let topic = self.topic_for_send(topic_id).await;
        let conversation = self.store.mark_read(&topic, seq).await;
        self.handler.on_conversation_updated(&conversation);
        self.connection
            .do_send_request(Frame::read(topic_id.clone(), conversation.last_read_seq), true)
            .await?;
        Ok(conversation)
    }

    pub async fn delete_message(&self, topic_id: &TopicId, chat_id: &str) -> Result<(), ClientError> {
        self.store.delete_message(topic_id, chat_id).await
    }

    /// History page ending at `last_seq` (`0` = latest).
    pub async fn sync_chatlogs(
        &self,
        topic_id: &TopicId,
        last_seq: u64,
        limit: u32,
    ) -> Result<MessagePage, ClientError> {
        self.store.get_messages(topic_id, last_seq, limit).await
    }

    /// Replays cached conversations, then pulls server changes since the last
    /// sync, notifying `on_conversation_updated` for each.
    pub async fn begin_sync_conversations(&self, limit: u32) -> Result<usize, ClientError> {
        let handler = &self.handler;
        self.store
            .begin_sync_conversations(limit, |conversation| {
                handler.on_conversation_updated(conversation)
            })
            .await
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
