//! Routes inbound frames by type and acknowledges those that carry a `chatId`.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ChatLog, ChatLogStatus, TopicId, UserId},
    protocol::{code, Frame, FrameType},
};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionEvent},
    events::ChatEventHandler,
    store::{ChatStore, MergeOutcome},
};

pub struct Dispatcher {
    connection: Arc<Connection>,
    store: Arc<ChatStore>,
    handler: Arc<dyn ChatEventHandler>,
}

impl Dispatcher {
    pub fn new(
        connection: Arc<Connection>,
        store: Arc<ChatStore>,
        handler: Arc<dyn ChatEventHandler>,
    ) -> Self {
        Self {
            connection,
            store,
            handler,
        }
    }

    pub async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connecting => self.handler.on_connecting(),
            ConnectionEvent::Connected => self.handler.on_connected(),
            ConnectionEvent::NetBroken(reason) => self.handler.on_net_broken(&reason),
            ConnectionEvent::AuthError(reason) => self.handler.on_auth_error(&reason),
            ConnectionEvent::Frame(frame) => self.dispatch(frame).await,
        }
    }

    pub async fn dispatch(&self, frame: Frame) {
        if frame.frame_type == FrameType::Resp {
            self.connection.resolve_response(frame).await;
            return;
        }

        let code = match &frame.frame_type {
            FrameType::Nop => {
                debug!("dispatcher: heartbeat");
                code::OK
            }
            FrameType::System => {
                self.handler.on_system_message(&frame);
                code::OK
            }
            FrameType::Kickout => {
                let reason = frame.message.clone().unwrap_or_else(|| "kicked out".to_string());
                warn!(%reason, "dispatcher: kicked off by another client");
                self.handler.on_kickoff_by_other_client(&reason);
                code::OK
            }
            FrameType::Typing => {
                match (&frame.topic_id, &frame.attendee) {
                    (Some(topic_id), Some(sender_id)) => self.handler.on_typing(topic_id, sender_id),
                    _ => debug!("dispatcher: typing frame without topic or sender"),
                }
                code::OK
            }
            FrameType::Read => {
                self.on_read(&frame).await;
                code::OK
            }
            FrameType::Chat => self.on_chat(&frame).await,
            FrameType::Resp => code::OK,
            FrameType::Other(kind) => {
                warn!(frame_type = %kind, "dispatcher: unsupported frame type");
                code::NOT_IMPLEMENTED
            }
        };

        if frame.chat_id().is_some() {
            self.acknowledge(&frame, code).await;
        }

        if frame.frame_type == FrameType::Kickout {
            self.connection.shutdown().await;
        }
    }

    async fn acknowledge(&self, frame: &Frame, code: u16) {
        if let Err(err) = self
            .connection
            .do_send_request(Frame::response(frame, code), false)
            .await
        {
            debug!(chat_id = ?frame.chat_id, "dispatcher: acknowledgement not sent: {err}");
        }
    }

    async fn on_read(&self, frame: &Frame) {
        let Some(topic_id) = frame.topic_id.as_ref() else {
            debug!("dispatcher: read frame without topic");
            return;
        };
        let topic = match self.store.get_topic(topic_id).await {
            Ok(topic) => topic,
            Err(err) => {
                warn!(topic_id = %topic_id, "dispatcher: dropping read frame: {err}");
                return;
            }
        };
        let conversation = self.store.mark_read(&topic, frame.seq).await;
        self.handler.on_conversation_updated(&conversation);
    }

    async fn on_chat(&self, frame: &Frame) -> u16 {
        let Some(topic_id) = frame.topic_id.as_ref() else {
            warn!(chat_id = ?frame.chat_id, "dispatcher: dropping chat frame without topic");
            return code::OK;
        };
        let topic = match self.store.get_topic(topic_id).await {
            Ok(topic) => topic,
            Err(err) => {
                warn!(topic_id = %topic_id, "dispatcher: dropping chat frame: {err}");
                return code::OK;
            }
        };

        if let Some(profile) = frame.attendee_profile.clone() {
            self.store.cache_user(profile).await;
        }

        let log = chat_log_from_frame(topic_id, frame, self.store.user_id());
        let ack = self.handler.on_topic_message(&topic, &log);

        if ack.has_read && log.seq > 0 {
            let read = Frame::read(topic_id.clone(), log.seq);
            if let Err(err) = self.connection.do_send_request(read, true).await {
                debug!(topic_id = %topic_id, "dispatcher: read receipt not sent: {err}");
            }
        }

        let has_read = ack.has_read || log.sent_by_me;
        match self.store.process_incoming(&topic, log, has_read).await {
            MergeOutcome::Updated(conversation) => self.handler.on_conversation_updated(&conversation),
            MergeOutcome::Removed(topic_id) => {
                info!(topic_id = %topic_id, "dispatcher: conversation removed");
                self.handler.on_conversation_removed(&topic_id);
            }
            MergeOutcome::Ignored => {}
        }
        ack.code
    }
}

fn chat_log_from_frame(topic_id: &TopicId, frame: &Frame, me: &UserId) -> ChatLog {
    let sender_id = frame.attendee.clone().unwrap_or_default();
    let sent_by_me = !sender_id.is_empty() && sender_id == *me;
    ChatLog {
        topic_id: topic_id.clone(),
        chat_id: frame.chat_id().unwrap_or_default().to_string(),
        seq: frame.seq,
        sender_id,
        content: frame.content.clone().unwrap_or_default(),
        created_at: frame.created_at.unwrap_or_else(Utc::now),
        status: if sent_by_me {
            ChatLogStatus::Sent
        } else {
            ChatLogStatus::Received
        },
        recall: false,
        sent_by_me,
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
