use super::*;
use crate::{
    connection::{ConnectionSettings, RequestHooks},
    events::{BroadcastEventHandler, ClientEvent, MessageAck},
    store::StoreSettings,
    test_support::{at, topic, FakeBackend},
    transport::{MemoryConnector, MemoryPeer},
};
use shared::{
    domain::{Content, UserProfile},
    protocol::content_type,
};
use std::time::Duration;
use storage::MemoryOnly;
use tokio::sync::broadcast;

struct Harness {
    dispatcher: Dispatcher,
    connection: Arc<Connection>,
    store: Arc<ChatStore>,
    backend: Arc<FakeBackend>,
    events: broadcast::Receiver<ClientEvent>,
    peer: MemoryPeer,
}

async fn harness(ack: MessageAck) -> Harness {
    let backend = FakeBackend::new().with_topic(topic("t1", 0)).await;
    let (connector, mut peers) = MemoryConnector::pair();
    let (connection, mut connection_events) = Connection::new(
        ConnectionSettings {
            endpoint: "http://chat.test".into(),
            device: "test".into(),
            token: None,
            with_token_in_url: false,
            reconnect_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
        },
        Arc::new(connector),
    );
    connection.connect().await;
    let peer = peers.recv().await.unwrap();
    peer.accept();
    while connection_events.recv().await != Some(ConnectionEvent::Connected) {}

    let store = Arc::new(ChatStore::new(
        StoreSettings {
            user_id: UserId::from("me"),
            topic_ttl: Duration::from_secs(300),
            recall_window: chrono::Duration::seconds(120),
        },
        backend.clone(),
        Arc::new(MemoryOnly),
    ));
    let handler = Arc::new(BroadcastEventHandler::new(64).with_ack(ack));
    let events = handler.subscribe();
    let dispatcher = Dispatcher::new(Arc::clone(&connection), Arc::clone(&store), handler);

    Harness {
        dispatcher,
        connection,
        store,
        backend,
        events,
        peer,
    }
}

fn chat_frame(topic_id: &str, chat_id: &str, seq: u64, sender: &str) -> Frame {
    Frame {
        frame_type: FrameType::Chat,
        chat_id: Some(chat_id.to_string()),
        topic_id: Some(TopicId::from(topic_id)),
        seq,
        attendee: Some(UserId::from(sender)),
        content: Some(Content::with_text(content_type::TEXT, "hello")),
        created_at: Some(at(seq as i64)),
        ..Frame::default()
    }
}

fn drain(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn chat_frame_is_merged_and_acknowledged() {
    let mut h = harness(MessageAck::default()).await;
    let mut frame = chat_frame("t1", "c1", 1, "alice");
    frame.attendee_profile = Some(UserProfile {
        user_id: UserId::from("alice"),
        name: "Alice".into(),
        ..UserProfile::default()
    });

    h.dispatcher.dispatch(frame).await;

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 2);
    let ClientEvent::TopicMessage { topic, message } = &events[0] else {
        panic!("expected topic message, got {:?}", events[0]);
    };
    assert_eq!(topic.id, TopicId::from("t1"));
    assert_eq!(message.chat_id, "c1");
    assert_eq!(message.status, ChatLogStatus::Received);
    let ClientEvent::ConversationUpdated(conversation) = &events[1] else {
        panic!("expected conversation update, got {:?}", events[1]);
    };
    assert_eq!(conversation.unread, 1);
    assert_eq!(conversation.last_message_chat_id, "c1");

    let ack = h.peer.try_next_frame().unwrap();
    assert_eq!(ack.frame_type, FrameType::Resp);
    assert_eq!(ack.chat_id(), Some("c1"));
    assert_eq!(ack.code, Some(code::OK));

    let profile = h.store.get_user(&UserId::from("alice")).await.unwrap();
    assert_eq!(profile.name, "Alice");
    assert_eq!(h.backend.user_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn has_read_reply_sends_read_receipt() {
    let mut h = harness(MessageAck {
        code: code::OK,
        has_read: true,
    })
    .await;

    h.dispatcher.dispatch(chat_frame("t1", "c1", 7, "alice")).await;

    let read = h.peer.try_next_frame().unwrap();
    assert_eq!(read.frame_type, FrameType::Read);
    assert_eq!(read.seq, 7);
    let ack = h.peer.try_next_frame().unwrap();
    assert_eq!(ack.frame_type, FrameType::Resp);

    let conversation = h.store.get_conversation(&TopicId::from("t1")).await.unwrap();
    assert_eq!(conversation.unread, 0);
    assert_eq!(conversation.last_read_seq, 7);
}

#[tokio::test]
async fn unknown_topic_is_dropped_without_callbacks() {
    let mut h = harness(MessageAck::default()).await;

    h.dispatcher.dispatch(chat_frame("nowhere", "c1", 1, "alice")).await;

    assert!(drain(&mut h.events).is_empty());
    assert!(h.store.get_conversation(&TopicId::from("nowhere")).await.is_none());
    let ack = h.peer.try_next_frame().unwrap();
    assert_eq!(ack.code, Some(code::OK));
}

#[tokio::test]
async fn response_frames_resolve_requests_without_ack() {
    let mut h = harness(MessageAck::default()).await;
    let connection = Arc::clone(&h.connection);
    let pending = tokio::spawn(async move {
        connection
            .send_and_wait_response(chat_frame("t1", "out-1", 0, "me"), RequestHooks::new())
            .await
    });
    let request = h.peer.next_frame().await.unwrap();

    h.dispatcher.dispatch(Frame::response(&request, code::OK)).await;

    assert!(pending.await.unwrap().unwrap().is_ok());
    assert!(h.peer.try_next_frame().is_none());
}

#[tokio::test]
async fn unsupported_types_are_answered_with_501() {
    let mut h = harness(MessageAck::default()).await;
    let frame = Frame {
        chat_id: Some("x1".into()),
        ..Frame::new(FrameType::from("poll.vote"))
    };

    h.dispatcher.dispatch(frame).await;

    let ack = h.peer.try_next_frame().unwrap();
    assert_eq!(ack.chat_id(), Some("x1"));
    assert_eq!(ack.code, Some(code::NOT_IMPLEMENTED));
}

#[tokio::test]
async fn frames_without_chat_id_are_not_acknowledged() {
    let mut h = harness(MessageAck::default()).await;

    h.dispatcher.dispatch(Frame::nop()).await;
    h.dispatcher
        .dispatch(Frame {
            attendee: Some(UserId::from("alice")),
            ..Frame::typing(TopicId::from("t1"))
        })
        .await;

    assert!(h.peer.try_next_frame().is_none());
    assert_eq!(
        drain(&mut h.events),
        vec![ClientEvent::Typing {
            topic_id: TopicId::from("t1"),
            sender_id: UserId::from("alice"),
        }]
    );
}

#[tokio::test]
async fn kickout_notifies_then_shuts_down() {
    let mut h = harness(MessageAck::default()).await;
    let frame = Frame {
        message: Some("signed in elsewhere".into()),
        ..Frame::new(FrameType::Kickout)
    };

    h.dispatcher.dispatch(frame).await;

    assert_eq!(
        drain(&mut h.events),
        vec![ClientEvent::KickoffByOtherClient("signed in elsewhere".into())]
    );
    assert!(!h.connection.is_running().await);
    assert!(h.peer.is_closed_by_client());
}

#[tokio::test]
async fn system_frames_are_forwarded_verbatim() {
    let mut h = harness(MessageAck::default()).await;
    let frame = Frame {
        message: Some("maintenance at noon".into()),
        chat_id: Some("s1".into()),
        ..Frame::new(FrameType::System)
    };

    h.dispatcher.dispatch(frame.clone()).await;

    assert_eq!(drain(&mut h.events), vec![ClientEvent::SystemMessage(frame)]);
    assert_eq!(h.peer.try_next_frame().unwrap().code, Some(code::OK));
}

#[tokio::test]
async fn read_frame_zeroes_unread() {
    let mut h = harness(MessageAck::default()).await;
    h.dispatcher.dispatch(chat_frame("t1", "c1", 1, "alice")).await;
    h.dispatcher.dispatch(chat_frame("t1", "c2", 2, "alice")).await;
    assert_eq!(
        h.store.get_conversation(&TopicId::from("t1")).await.unwrap().unread,
        2
    );
    drain(&mut h.events);

    h.dispatcher.dispatch(Frame::read(TopicId::from("t1"), 2)).await;

    let events = drain(&mut h.events);
    let [ClientEvent::ConversationUpdated(conversation)] = events.as_slice() else {
        panic!("expected one conversation update, got {events:?}");
    };
    assert_eq!(conversation.unread, 0);
    assert_eq!(conversation.last_read_seq, 2);
}

#[tokio::test]
async fn removal_is_reported_as_conversation_removed() {
    let mut h = harness(MessageAck::default()).await;
    h.dispatcher.dispatch(chat_frame("t1", "c1", 1, "alice")).await;
    drain(&mut h.events);

    let mut removed = chat_frame("t1", "x1", 2, "server");
    removed.content = Some(Content::new(content_type::CONVERSATION_REMOVED));
    h.dispatcher.dispatch(removed).await;

    let events = drain(&mut h.events);
    assert!(matches!(events.last(), Some(ClientEvent::ConversationRemoved(id)) if id.as_str() == "t1"));
    assert!(h.store.get_conversation(&TopicId::from("t1")).await.is_none());
}
