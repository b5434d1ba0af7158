use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use client_core::{
    BackendApi, ChatClient, ClientConfig, MemoryConnector, NoopEventHandler, SendOptions,
};
use shared::{
    domain::{ChatLogStatus, Conversation, Topic, TopicId, UserId, UserProfile},
    protocol::{code, ChatListPage, ChatLogPage, Frame, FrameType},
};
use storage::MemoryOnly;

/// Backend that knows nothing; every lookup fails.
struct OfflineBackend;

#[async_trait]
impl BackendApi for OfflineBackend {
    async fn get_chat_list(&self, _updated_at: Option<&str>, _limit: u32) -> Result<ChatListPage> {
        Ok(ChatListPage::default())
    }

    async fn get_chat_logs_desc(
        &self,
        _topic_id: &TopicId,
        _last_seq: u64,
        _limit: u32,
    ) -> Result<ChatLogPage> {
        Ok(ChatLogPage::default())
    }

    async fn get_topic(&self, topic_id: &TopicId) -> Result<Topic> {
        Err(anyhow!("topic {topic_id} unavailable"))
    }

    async fn get_conversation(&self, topic_id: &TopicId) -> Result<Conversation> {
        Err(anyhow!("conversation {topic_id} unavailable"))
    }

    async fn delete_messages(&self, _topic_id: &TopicId, _chat_ids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile> {
        Err(anyhow!("user {user_id} unavailable"))
    }
}

#[tokio::test]
async fn message_sent_while_offline_is_delivered_after_connect() {
    let (connector, mut peers) = MemoryConnector::pair();
    let client = ChatClient::new(
        ClientConfig::new("http://chat.test", "me"),
        Arc::new(connector),
        Arc::new(OfflineBackend),
        Arc::new(MemoryOnly),
        Arc::new(NoopEventHandler),
    );
    let topic_id = TopicId::from("t1");

    let sending = {
        let client = Arc::clone(&client);
        let topic_id = topic_id.clone();
        tokio::spawn(async move {
            client
                .do_send_text(&topic_id, "hi", SendOptions::default())
                .await
        })
    };

    // The queued send opens the socket.
    let mut peer = peers.recv().await.expect("socket opened");
    let provisional = client.messages(&topic_id).await;
    assert_eq!(provisional.len(), 1);
    assert_eq!(provisional[0].status, ChatLogStatus::Sending);

    peer.accept();
    let request = peer.next_frame().await.expect("flushed chat frame");
    assert_eq!(request.frame_type, FrameType::Chat);
    assert_eq!(request.content.as_ref().map(|c| c.text.as_str()), Some("hi"));

    let mut response = Frame::response(&request, code::OK);
    response.seq = 1;
    peer.push_frame(&response);

    let sent = sending.await.unwrap().unwrap();
    assert_eq!(sent.status, ChatLogStatus::Sent);
    assert_eq!(sent.seq, 1);

    let history = client.messages(&topic_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].chat_id, sent.chat_id);
    assert_eq!(history[0].status, ChatLogStatus::Sent);
    assert_eq!(
        client.get_conversation(&topic_id).await.map(|c| c.last_message_seq),
        Some(1)
    );
}
