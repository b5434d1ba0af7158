//! Shared fakes for the unit tests of this crate.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{ChatLog, ChatLogStatus, Content, Conversation, Topic, TopicId, UserId, UserProfile},
    protocol::{content_type, ChatListPage, ChatLogItem, ChatLogPage},
};
use tokio::sync::Mutex;

use storage::ChatLogPersistence;

use crate::backend::BackendApi;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
}

pub fn topic(id: &str, last_seq: u64) -> Topic {
    Topic {
        id: TopicId::from(id),
        name: format!("topic {id}"),
        owner_id: UserId::from("owner"),
        last_seq,
        ..Topic::default()
    }
}

pub fn text_log(topic_id: &str, chat_id: &str, seq: u64, sender: &str, secs: i64) -> ChatLog {
    ChatLog {
        topic_id: TopicId::from(topic_id),
        chat_id: chat_id.to_string(),
        seq,
        sender_id: UserId::from(sender),
        content: Content::with_text(content_type::TEXT, format!("message {seq}")),
        created_at: at(secs),
        status: ChatLogStatus::Received,
        recall: false,
        sent_by_me: false,
    }
}

pub fn history_item(seq: u64, sender: &str) -> ChatLogItem {
    ChatLogItem {
        chat_id: Some(format!("c{seq}")),
        seq,
        sender_id: UserId::from(sender),
        content: Content::with_text(content_type::TEXT, format!("message {seq}")),
        created_at: Some(at(seq as i64)),
        recall: false,
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub topics: Mutex<HashMap<TopicId, Topic>>,
    pub history: Mutex<HashMap<TopicId, Vec<ChatLogItem>>>,
    pub chat_list_pages: Mutex<VecDeque<ChatListPage>>,
    pub chat_list_cursors: Mutex<Vec<Option<String>>>,
    pub conversations: Mutex<HashMap<TopicId, Conversation>>,
    pub users: Mutex<HashMap<UserId, UserProfile>>,
    pub deleted: Mutex<Vec<(TopicId, String)>>,
    pub topic_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub user_calls: AtomicUsize,
    pub fail_topics: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn with_topic(self: Arc<Self>, topic: Topic) -> Arc<Self> {
        self.topics.lock().await.insert(topic.id.clone(), topic);
        self
    }

    pub async fn with_history(self: Arc<Self>, topic_id: &str, items: Vec<ChatLogItem>) -> Arc<Self> {
        self.history.lock().await.insert(TopicId::from(topic_id), items);
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn topic_calls(&self) -> usize {
        self.topic_calls.load(Ordering::SeqCst)
    }

    pub fn fail_topic_lookups(&self, fail: bool) {
        self.fail_topics.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn get_chat_list(&self, updated_at: Option<&str>, _limit: u32) -> Result<ChatListPage> {
        self.chat_list_cursors
            .lock()
            .await
            .push(updated_at.map(str::to_string));
        Ok(self.chat_list_pages.lock().await.pop_front().unwrap_or_default())
    }

    async fn get_chat_logs_desc(&self, topic_id: &TopicId, last_seq: u64, limit: u32) -> Result<ChatLogPage> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let history = self.history.lock().await;
        let mut items: Vec<ChatLogItem> = history
            .get(topic_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|item| last_seq == 0 || item.seq <= last_seq)
            .collect();
        items.sort_by(|a, b| b.seq.cmp(&a.seq));
        let has_more = items.len() > limit as usize;
        items.truncate(limit as usize);
        Ok(ChatLogPage { items, has_more })
    }

    async fn get_topic(&self, topic_id: &TopicId) -> Result<Topic> {
        self.topic_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_topics.load(Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable"));
        }
        self.topics
            .lock()
            .await
            .get(topic_id)
            .cloned()
            .ok_or_else(|| anyhow!("topic {topic_id} not found"))
    }

    async fn get_conversation(&self, topic_id: &TopicId) -> Result<Conversation> {
        self.conversations
            .lock()
            .await
            .get(topic_id)
            .cloned()
            .ok_or_else(|| anyhow!("conversation {topic_id} not found"))
    }

    async fn delete_messages(&self, topic_id: &TopicId, chat_ids: &[String]) -> Result<()> {
        let mut deleted = self.deleted.lock().await;
        for chat_id in chat_ids {
            deleted.push((topic_id.clone(), chat_id.clone()));
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.users
            .lock()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| anyhow!("user {user_id} not found"))
    }
}

/// Durable adapter whose every operation fails; counts the attempts.
#[derive(Default)]
pub struct FailingPersistence {
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
    pub deletes: AtomicUsize,
}

#[async_trait]
impl ChatLogPersistence for FailingPersistence {
    async fn load(&self, _topic_id: &TopicId) -> Result<Vec<ChatLog>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("disk I/O error"))
    }

    async fn save(&self, _topic_id: &TopicId, _messages: &[ChatLog]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("disk I/O error"))
    }

    async fn delete(&self, _topic_id: &TopicId, _chat_id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("disk I/O error"))
    }

    async fn clear(&self, _topic_id: &TopicId) -> Result<()> {
        Err(anyhow!("disk I/O error"))
    }

    async fn close(&self) {}

    fn is_durable(&self) -> bool {
        true
    }
}
