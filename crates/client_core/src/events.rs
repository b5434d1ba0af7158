use shared::{
    domain::{ChatLog, Conversation, Topic, TopicId, UserId},
    protocol::{code, Frame},
};
use tokio::sync::broadcast;

/// Reply of the application to an inbound topic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageAck {
    pub code: u16,
    /// The message is on screen: mark the conversation read up to it.
    pub has_read: bool,
}

impl Default for MessageAck {
    fn default() -> Self {
        Self {
            code: code::OK,
            has_read: false,
        }
    }
}

/// Typed subscription surface for UI layers.
///
/// Every method has a no-op default so an implementor only overrides what it
/// renders; nothing is ever left undefined at dispatch time.
pub trait ChatEventHandler: Send + Sync {
    fn on_connected(&self) {}
    fn on_connecting(&self) {}
    fn on_net_broken(&self, _reason: &str) {}
    fn on_auth_error(&self, _reason: &str) {}
    fn on_kickoff_by_other_client(&self, _reason: &str) {}
    fn on_typing(&self, _topic_id: &TopicId, _sender_id: &UserId) {}
    fn on_topic_message(&self, _topic: &Topic, _message: &ChatLog) -> MessageAck {
        MessageAck::default()
    }
    fn on_conversation_updated(&self, _conversation: &Conversation) {}
    fn on_conversation_removed(&self, _topic_id: &TopicId) {}
    fn on_system_message(&self, _frame: &Frame) {}
}

/// Handler that ignores every event.
pub struct NoopEventHandler;

impl ChatEventHandler for NoopEventHandler {}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Connecting,
    NetBroken(String),
    AuthError(String),
    KickoffByOtherClient(String),
    Typing { topic_id: TopicId, sender_id: UserId },
    TopicMessage { topic: Topic, message: ChatLog },
    ConversationUpdated(Conversation),
    ConversationRemoved(TopicId),
    SystemMessage(Frame),
}

/// Republishes every callback as a [`ClientEvent`] on a broadcast channel.
pub struct BroadcastEventHandler {
    events: broadcast::Sender<ClientEvent>,
    ack: MessageAck,
}

impl BroadcastEventHandler {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            events,
            ack: MessageAck::default(),
        }
    }

    /// Reply returned for every topic message, e.g. `has_read` for a focused chat view.
    pub fn with_ack(mut self, ack: MessageAck) -> Self {
        self.ack = ack;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

impl ChatEventHandler for BroadcastEventHandler {
    fn on_connected(&self) {
        self.emit(ClientEvent::Connected);
    }

    fn on_connecting(&self) {
        self.emit(ClientEvent::Connecting);
    }

    fn on_net_broken(&self, reason: &str) {
        self.emit(ClientEvent::NetBroken(reason.to_string()));
    }

    fn on_auth_error(&self, reason: &str) {
        self.emit(ClientEvent::AuthError(reason.to_string()));
    }

    fn on_kickoff_by_other_client(&self, reason: &str) {
        self.emit(ClientEvent::KickoffByOtherClient(reason.to_string()));
    }

    fn on_typing(&self, topic_id: &TopicId, sender_id: &UserId) {
        self.emit(ClientEvent::Typing {
            topic_id: topic_id.clone(),
            sender_id: sender_id.clone(),
        });
    }

    fn on_topic_message(&self, topic: &Topic, message: &ChatLog) -> MessageAck {
        self.emit(ClientEvent::TopicMessage {
            topic: topic.clone(),
            message: message.clone(),
        });
        self.ack
    }

    fn on_conversation_updated(&self, conversation: &Conversation) {
        self.emit(ClientEvent::ConversationUpdated(conversation.clone()));
    }

    fn on_conversation_removed(&self, topic_id: &TopicId) {
        self.emit(ClientEvent::ConversationRemoved(topic_id.clone()));
    }

    fn on_system_message(&self, frame: &Frame) {
        self.emit(ClientEvent::SystemMessage(frame.clone()));
    }
}
