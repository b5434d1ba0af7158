use super::*;
use crate::test_support::{text_log, topic, FakeBackend};
use storage::{MemoryOnly, SqliteChatLogStore};
use tokio::sync::broadcast;

fn client_with(
    backend: Arc<FakeBackend>,
    persistence: Arc<dyn ChatLogPersistence>,
) -> (Arc<ChatClient>, broadcast::Receiver<ClientEvent>, mpsc::UnboundedReceiver<MemoryPeer>) {
    let (connector, peers) = MemoryConnector::pair();
    let handler = Arc::new(BroadcastEventHandler::new(64));
    let events = handler.subscribe();
    let client = ChatClient::new(
        ClientConfig::new("http://chat.test", "me"),
        Arc::new(connector),
        backend,
        persistence,
        handler,
    );
    (client, events, peers)
}

#[tokio::test]
async fn lifecycle_events_reach_the_handler() {
    let (client, mut events, mut peers) = client_with(FakeBackend::new(), Arc::new(MemoryOnly));

    client.connect().await;
    let peer = peers.recv().await.unwrap();
    assert!(peer.url.ends_with("/api/connect?device=rust-sdk"));
    peer.accept();
    assert_eq!(events.recv().await.unwrap(), ClientEvent::Connecting);
    assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);
    assert_eq!(client.connection_state().await, ConnectionState::Connected);

    peer.fail("reset by peer");
    assert_eq!(
        events.recv().await.unwrap(),
        ClientEvent::NetBroken("reset by peer".into())
    );
}

#[tokio::test]
async fn auth_failure_is_reported_and_terminal() {
    let (client, mut events, mut peers) = client_with(FakeBackend::new(), Arc::new(MemoryOnly));

    client.connect().await;
    peers.recv().await.unwrap().reject_unauthorized();

    assert_eq!(events.recv().await.unwrap(), ClientEvent::Connecting);
    assert!(matches!(events.recv().await.unwrap(), ClientEvent::AuthError(_)));
    assert!(!client.connection().is_running().await);
}

#[tokio::test]
async fn remove_conversation_notifies_and_forgets_history() {
    let (client, mut events, _peers) = client_with(FakeBackend::new(), Arc::new(MemoryOnly));
    let t1 = topic("t1", 0);
    client
        .store()
        .process_incoming(&t1, text_log("t1", "c1", 1, "alice", 1), false)
        .await;

    let removed = client.remove_conversation(&t1.id).await;

    assert_eq!(removed.map(|c| c.topic_id), Some(t1.id.clone()));
    assert_eq!(events.recv().await.unwrap(), ClientEvent::ConversationRemoved(t1.id.clone()));
    assert!(client.messages(&t1.id).await.is_empty());
    assert!(client.remove_conversation(&t1.id).await.is_none());
}

#[tokio::test]
async fn fetch_conversation_caches_server_copy() {
    let backend = FakeBackend::new();
    backend.conversations.lock().await.insert(
        TopicId::from("t1"),
        Conversation {
            topic_id: TopicId::from("t1"),
            name: "design".into(),
            last_seq: 12,
            ..Conversation::default()
        },
    );
    let (client, mut events, _peers) = client_with(backend, Arc::new(MemoryOnly));

    let fetched = client.fetch_conversation(&TopicId::from("t1")).await.unwrap();

    assert_eq!(fetched.name, "design");
    assert_eq!(client.conversations().await, vec![fetched.clone()]);
    assert_eq!(events.recv().await.unwrap(), ClientEvent::ConversationUpdated(fetched));
    assert!(matches!(
        client.fetch_conversation(&TopicId::from("t2")).await,
        Err(ClientError::Backend(_))
    ));
}

#[tokio::test]
async fn teardown_closes_persistence() {
    let persistence = Arc::new(SqliteChatLogStore::open("sqlite::memory:").await.unwrap());
    let (client, _events, _peers) = client_with(FakeBackend::new(), persistence.clone());

    client.teardown().await;

    assert!(persistence.pool().is_closed());
    assert!(!client.connection().is_running().await);
}
