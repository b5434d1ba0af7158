//! In-memory authoritative cache of topics, conversations and per-topic
//! message history, mirrored into a [`ChatLogPersistence`] adapter.
//!
//! Cache mutations happen under the store lock and never across a backend or
//! persistence await, so a merge is observed either completely or not at all.
//! Durable writes are queued under the same lock, which keeps them in
//! mutation order. Callers only ever receive cloned snapshots.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{ChatLog, ChatLogStatus, Content, Conversation, Topic, TopicId, UserId, UserProfile},
    protocol::{content_type, ChatLogItem, Frame, MessagePage},
};
use storage::ChatLogPersistence;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{backend::BackendApi, config::ClientConfig, error::ClientError};
use durable::DurableWriter;

pub mod conversation;
mod durable;
pub mod messages;

pub use messages::MessageList;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub user_id: UserId,
    pub topic_ttl: Duration,
    pub recall_window: chrono::Duration,
}

impl From<&ClientConfig> for StoreSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            topic_ttl: config.topic_ttl(),
            recall_window: config.recall_window(),
        }
    }
}

/// Result of merging an inbound log into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Updated(Conversation),
    Removed(TopicId),
    /// Control-only frame (`seq == 0` or no `chatId`); only the watermark moved.
    Ignored,
}

struct CachedTopic {
    topic: Topic,
    fetched_at: Instant,
}

#[derive(Default)]
struct TopicMessages {
    list: MessageList,
    loaded: bool,
}

#[derive(Default)]
struct StoreInner {
    topics: HashMap<TopicId, CachedTopic>,
    conversations: HashMap<TopicId, Conversation>,
    messages: HashMap<TopicId, TopicMessages>,
    users: HashMap<UserId, UserProfile>,
    chat_list_watermark: Option<String>,
}

impl StoreInner {
    fn advance_seq(&mut self, topic_id: &TopicId, seq: u64) {
        if let Some(cached) = self.topics.get_mut(topic_id) {
            cached.topic.last_seq = cached.topic.last_seq.max(seq);
        }
        if let Some(conversation) = self.conversations.get_mut(topic_id) {
            conversation.last_seq = conversation.last_seq.max(seq);
        }
    }

    fn known_last_seq(&self, topic_id: &TopicId) -> u64 {
        let from_conversation = self.conversations.get(topic_id).map(|c| c.last_seq);
        let from_topic = self.topics.get(topic_id).map(|t| t.topic.last_seq);
        let from_messages = self.messages.get(topic_id).map(|m| m.list.last_seq());
        [from_conversation, from_topic, from_messages]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0)
    }

    fn list_mut(&mut self, topic_id: &TopicId) -> &mut MessageList {
        &mut self.messages.entry(topic_id.clone()).or_default().list
    }
}

pub struct ChatStore {
    settings: StoreSettings,
    backend: Arc<dyn BackendApi>,
    persistence: Arc<dyn ChatLogPersistence>,
    durable: DurableWriter,
    inner: Mutex<StoreInner>,
}

impl ChatStore {
    pub fn new(
        settings: StoreSettings,
        backend: Arc<dyn BackendApi>,
        persistence: Arc<dyn ChatLogPersistence>,
    ) -> Self {
        let durable = DurableWriter::spawn(Arc::clone(&persistence));
        Self {
            settings,
            backend,
            persistence,
            durable,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.settings.user_id
    }

    pub fn persistence(&self) -> &Arc<dyn ChatLogPersistence> {
        &self.persistence
    }

    // ---- topics ----

    pub async fn cached_topic(&self, topic_id: &TopicId) -> Option<Topic> {
        let inner = self.inner.lock().await;
        inner.topics.get(topic_id).map(|cached| cached.topic.clone())
    }

    pub async fn put_topic(&self, topic: Topic) {
        let mut inner = self.inner.lock().await;
        let last_seq = inner.known_last_seq(&topic.id);
        let mut topic = topic;
        topic.last_seq = topic.last_seq.max(last_seq);
        inner.topics.insert(
            topic.id.clone(),
            CachedTopic {
                topic,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Fresh cached descriptor, else a backend refresh; a stale entry is still
    /// served when the refresh fails.
    pub async fn get_topic(&self, topic_id: &TopicId) -> Result<Topic, ClientError> {
        let stale = {
            let inner = self.inner.lock().await;
            match inner.topics.get(topic_id) {
                Some(cached) if cached.fetched_at.elapsed() < self.settings.topic_ttl => {
                    return Ok(cached.topic.clone());
                }
                Some(cached) => Some(cached.topic.clone()),
                None => None,
            }
        };

        match self.backend.get_topic(topic_id).await {
            Ok(topic) => {
                self.put_topic(topic).await;
                self.cached_topic(topic_id)
                    .await
                    .ok_or_else(|| ClientError::UnknownTopic(topic_id.clone()))
            }
            Err(err) => match stale {
                Some(topic) => {
                    warn!(topic_id = %topic_id, "store: topic refresh failed, serving stale entry: {err:#}");
                    Ok(topic)
                }
                None => {
                    warn!(topic_id = %topic_id, "store: topic lookup failed: {err:#}");
                    Err(ClientError::UnknownTopic(topic_id.clone()))
                }
            },
        }
    }

    // ---- users ----

    pub async fn cache_user(&self, profile: UserProfile) {
        let mut inner = self.inner.lock().await;
        inner.users.insert(profile.user_id.clone(), profile);
    }

    /// Sender resolver: cache first, then the backend.
    pub async fn get_user(&self, user_id: &UserId) -> Result<UserProfile, ClientError> {
        if let Some(profile) = self.inner.lock().await.users.get(user_id) {
            return Ok(profile.clone());
        }
        let profile = self.backend.get_user(user_id).await?;
        self.cache_user(profile.clone()).await;
        Ok(profile)
    }

    // ---- conversations ----

    pub async fn get_conversation(&self, topic_id: &TopicId) -> Option<Conversation> {
        self.inner.lock().await.conversations.get(topic_id).cloned()
    }

    /// Snapshot of every conversation, sticky first, then most recently updated.
    pub async fn conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self
            .inner
            .lock()
            .await
            .conversations
            .values()
            .cloned()
            .collect();
        conversations.sort_by(|a, b| {
            b.sticky
                .cmp(&a.sticky)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.topic_id.cmp(&b.topic_id))
        });
        conversations
    }

    pub async fn put_conversation(&self, conversation: Conversation) -> Conversation {
        let mut inner = self.inner.lock().await;
        let mut conversation = conversation;
        conversation.last_seq = conversation
            .last_seq
            .max(inner.known_last_seq(&conversation.topic_id));
        inner.advance_seq(&conversation.topic_id, conversation.last_seq);
        inner
            .conversations
            .insert(conversation.topic_id.clone(), conversation.clone());
        conversation
    }

    pub async fn fetch_conversation(&self, topic_id: &TopicId) -> Result<Conversation, ClientError> {
        let conversation = self.backend.get_conversation(topic_id).await?;
        Ok(self.put_conversation(conversation).await)
    }

    /// Local removal of a conversation and its cached history.
    pub async fn remove_conversation(&self, topic_id: &TopicId) -> Option<Conversation> {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.messages.remove(topic_id);
            self.durable.clear(topic_id);
            inner.conversations.remove(topic_id)
        };
        removed
    }

    /// Replays cached conversations through `notify`, then pages the server
    /// chat list from the stored watermark. Returns the number of items synced.
    pub async fn begin_sync_conversations<F>(&self, limit: u32, notify: F) -> Result<usize, ClientError>
    where
        F: Fn(&Conversation) + Send + Sync,
    {
        for conversation in self.conversations().await {
            notify(&conversation);
        }

        let mut synced = 0usize;
        loop {
            let watermark = self.inner.lock().await.chat_list_watermark.clone();
            let page = self
                .backend
                .get_chat_list(watermark.as_deref(), limit)
                .await?;
            let page_len = page.items.len();

            for mut item in page.items {
                conversation::recompute_unread(&mut item);
                let merged = self.put_conversation(item).await;
                notify(&merged);
            }
            synced += page_len;

            let advanced = {
                let mut inner = self.inner.lock().await;
                match page.updated_at.filter(|next| !next.is_empty()) {
                    Some(next)
                        if inner
                            .chat_list_watermark
                            .as_deref()
                            .map_or(true, |current| next.as_str() > current) =>
                    {
                        inner.chat_list_watermark = Some(next);
                        true
                    }
                    _ => false,
                }
            };

            if !page.has_more || page_len == 0 {
                break;
            }
            if !advanced {
                warn!(synced, "store: chat list cursor did not advance, stopping sync");
                break;
            }
        }

        info!(synced, "store: conversation list synced");
        Ok(synced)
    }

    pub async fn chat_list_watermark(&self) -> Option<String> {
        self.inner.lock().await.chat_list_watermark.clone()
    }

    /// Explicit read mark; rebuilds the view from `topic` and zeroes unread.
    /// `seq == 0` marks everything known as read.
    pub async fn mark_read(&self, topic: &Topic, seq: u64) -> Conversation {
        let mut inner = self.inner.lock().await;
        let seq = if seq == 0 {
            inner.known_last_seq(&topic.id)
        } else {
            seq
        };
        let topic = inner
            .topics
            .get(&topic.id)
            .map(|cached| cached.topic.clone())
            .unwrap_or_else(|| topic.clone());
        let rebuilt = conversation::build_from_topic(&topic, inner.conversations.get(&topic.id));
        let updated = conversation::mark_read(&rebuilt, seq, Utc::now());
        inner.conversations.insert(topic.id.clone(), updated.clone());
        updated
    }

    // ---- messages ----

    /// Cached history of a topic, loading the durable mirror on first access.
    pub async fn messages(&self, topic_id: &TopicId) -> Vec<ChatLog> {
        self.ensure_loaded(topic_id).await;
        let inner = self.inner.lock().await;
        inner
            .messages
            .get(topic_id)
            .map(|m| m.list.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub async fn get_message(&self, topic_id: &TopicId, chat_id: &str) -> Option<ChatLog> {
        let inner = self.inner.lock().await;
        inner.messages.get(topic_id)?.list.get(chat_id).cloned()
    }

    async fn ensure_loaded(&self, topic_id: &TopicId) {
        {
            let inner = self.inner.lock().await;
            if inner.messages.get(topic_id).is_some_and(|m| m.loaded) {
                return;
            }
        }

        let durable = match self.durable.load(topic_id).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!(topic_id = %topic_id, "store: durable cache load failed, treating as empty: {err:#}");
                Vec::new()
            }
        };

        let mut inner = self.inner.lock().await;
        let entry = inner.messages.entry(topic_id.clone()).or_default();
        if entry.loaded {
            return;
        }
        // Logs merged while loading are newer than the durable copies.
        let fresh: Vec<ChatLog> = entry.list.as_slice().to_vec();
        entry.list.update_messages(durable);
        entry.list.update_messages(fresh);
        entry.loaded = true;
        let last_seq = entry.list.last_seq();
        inner.advance_seq(topic_id, last_seq);
        debug!(topic_id = %topic_id, "store: message cache loaded");
    }

    /// `limit` messages ending at `last_seq` (`0` = latest): served from the
    /// cache when the window is complete and contiguous, from the backend
    /// otherwise.
    pub async fn get_messages(
        &self,
        topic_id: &TopicId,
        last_seq: u64,
        limit: u32,
    ) -> Result<MessagePage, ClientError> {
        self.ensure_loaded(topic_id).await;

        let last_seq = {
            let inner = self.inner.lock().await;
            let last_seq = if last_seq == 0 {
                inner.known_last_seq(topic_id)
            } else {
                last_seq
            };
            if let Some(list) = inner.messages.get(topic_id).map(|m| &m.list) {
                if let Some(window) = list.window(last_seq, limit as usize) {
                    debug!(topic_id = %topic_id, last_seq, limit, "store: history served from cache");
                    return Ok(MessagePage {
                        items: list.expand_controls(window),
                        has_more: false,
                    });
                }
            }
            last_seq
        };

        let page = self
            .backend
            .get_chat_logs_desc(topic_id, last_seq, limit)
            .await?;
        let mut fetched: Vec<ChatLog> = page
            .items
            .into_iter()
            .map(|item| self.normalize(topic_id, item))
            .collect();
        fetched.sort_by(ChatLog::order_cmp);

        let items = {
            let mut inner = self.inner.lock().await;
            let window = self.settings.recall_window;
            let list = inner.list_mut(topic_id);
            list.update_messages(fetched.iter().cloned());
            for control in fetched.iter().filter(|log| log.content.is_control()) {
                apply_control(list, control, window);
            }
            let items: Vec<ChatLog> = fetched
                .iter()
                .filter_map(|log| list.get(&log.chat_id).cloned())
                .collect();
            let max_seq = list.last_seq();
            inner.advance_seq(topic_id, max_seq);
            self.durable.save(topic_id, items.clone());
            items
        };

        Ok(MessagePage {
            items,
            has_more: page.has_more,
        })
    }

    /// Turns a raw backend history item into a cache entry.
    pub fn normalize(&self, topic_id: &TopicId, item: ChatLogItem) -> ChatLog {
        let chat_id = item
            .chat_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("seq-{}", item.seq));
        let sent_by_me = item.sender_id == self.settings.user_id;
        ChatLog {
            topic_id: topic_id.clone(),
            chat_id,
            seq: item.seq,
            sender_id: item.sender_id,
            content: item.content,
            created_at: item.created_at.unwrap_or_default(),
            status: if sent_by_me {
                ChatLogStatus::Sent
            } else {
                ChatLogStatus::Received
            },
            recall: item.recall,
            sent_by_me,
        }
    }

    /// Upserts `logs` into the topic cache and mirrors them durably in the background.
    pub async fn update_messages(&self, topic_id: &TopicId, logs: Vec<ChatLog>) {
        let mut inner = self.inner.lock().await;
        let list = inner.list_mut(topic_id);
        list.update_messages(logs.iter().cloned());
        let max_seq = list.last_seq();
        inner.advance_seq(topic_id, max_seq);
        self.durable.save(topic_id, logs);
    }

    /// Merges an inbound log: side effects on the history first, then the
    /// conversation aggregate.
    pub async fn process_incoming(&self, topic: &Topic, mut log: ChatLog, has_read: bool) -> MergeOutcome {
        let topic_id = topic.id.clone();
        self.ensure_loaded(&topic_id).await;

        let mut inner = self.inner.lock().await;
        inner.advance_seq(&topic_id, log.seq);
        if log.seq == 0 || log.chat_id.is_empty() {
            debug!(topic_id = %topic_id, "store: control-only frame, watermark advanced");
            return MergeOutcome::Ignored;
        }

        if log.sender_id == self.settings.user_id {
            log.sent_by_me = true;
        }

        let mut touched = Vec::new();
        let mut cleared = false;
        let content_kind = log.content.content_type.clone();
        match content_kind.as_str() {
            content_type::TOPIC_JOIN if log.sent_by_me => {
                inner.list_mut(&topic_id).clear();
                cleared = true;
            }
            content_type::RECALL | content_type::UPDATE_EXTRA => {
                let window = self.settings.recall_window;
                if let Some(target) = apply_control(inner.list_mut(&topic_id), &log, window) {
                    touched.push(target);
                }
            }
            content_type::TOPIC_UPDATE | content_type::TOPIC_CHANGE_OWNER => {
                if let Some(cached) = inner.topics.get_mut(&topic_id) {
                    conversation::apply_topic_event(&mut cached.topic, &log.content);
                }
            }
            _ => {}
        }

        let list = inner.list_mut(&topic_id);
        if let Some(existing) = list.get(&log.chat_id) {
            if existing.status == ChatLogStatus::Sending || log.sent_by_me {
                log.status = ChatLogStatus::Sent;
            }
        } else if log.sent_by_me && log.status == ChatLogStatus::Received {
            log.status = ChatLogStatus::Sent;
        }
        list.update_messages([log.clone()]);
        touched.push(log.clone());

        let previous = inner.conversations.get(&topic_id).cloned();
        let topic = inner
            .topics
            .get(&topic_id)
            .map(|cached| cached.topic.clone())
            .unwrap_or_else(|| topic.clone());
        let outcome = match conversation::merge_chat_log(previous.as_ref(), &topic, &log, has_read) {
            Some(conversation) => {
                inner
                    .conversations
                    .insert(topic_id.clone(), conversation.clone());
                MergeOutcome::Updated(conversation)
            }
            None => {
                inner.conversations.remove(&topic_id);
                inner.messages.remove(&topic_id);
                cleared = true;
                touched.clear();
                MergeOutcome::Removed(topic_id.clone())
            }
        };
        if cleared {
            self.durable.clear(&topic_id);
        }
        self.durable.save(&topic_id, touched);
        outcome
    }

    /// Provisional copy of an outbound message, rendered before the server
    /// confirms it. Never persisted while `Sending`.
    pub async fn save_outgoing(&self, topic_id: &TopicId, chat_id: &str, content: Content) -> ChatLog {
        self.ensure_loaded(topic_id).await;
        let mut inner = self.inner.lock().await;
        let log = ChatLog {
            topic_id: topic_id.clone(),
            chat_id: chat_id.to_string(),
            seq: inner.known_last_seq(topic_id),
            sender_id: self.settings.user_id.clone(),
            content,
            created_at: Utc::now(),
            status: ChatLogStatus::Sending,
            recall: false,
            sent_by_me: true,
        };
        inner.list_mut(topic_id).update_messages([log.clone()]);
        log
    }

    /// Settles a provisional message with the server response.
    pub async fn confirm_outgoing(&self, topic: &Topic, chat_id: &str, response: &Frame) -> Option<MergeOutcome> {
        let mut log = self.get_message(&topic.id, chat_id).await?;
        if response.seq == 0 {
            let mut inner = self.inner.lock().await;
            let list = inner.list_mut(&topic.id);
            let mut confirmed = list.get(chat_id)?.clone();
            confirmed.status = ChatLogStatus::Sent;
            list.update_messages([confirmed]);
            return None;
        }
        log.seq = response.seq;
        if let Some(created_at) = response.created_at {
            log.created_at = created_at;
        }
        log.status = ChatLogStatus::Sent;
        Some(self.process_incoming(topic, log, true).await)
    }

    pub async fn fail_outgoing(&self, topic_id: &TopicId, chat_id: &str) -> Option<ChatLog> {
        let mut inner = self.inner.lock().await;
        let list = inner.list_mut(topic_id);
        let mut failed = list.get(chat_id)?.clone();
        if failed.status != ChatLogStatus::Sending {
            return Some(failed);
        }
        failed.status = ChatLogStatus::Failed;
        list.update_messages([failed.clone()]);
        Some(failed)
    }

    /// Deletes on the server, then locally (in memory and a durable tombstone).
    pub async fn delete_message(&self, topic_id: &TopicId, chat_id: &str) -> Result<(), ClientError> {
        self.backend
            .delete_messages(topic_id, &[chat_id.to_string()])
            .await?;
        let mut inner = self.inner.lock().await;
        inner.list_mut(topic_id).remove(chat_id);
        self.durable.delete(topic_id, chat_id);
        Ok(())
    }

    /// Waits until every durable write queued so far has been applied.
    pub async fn flush(&self) {
        self.durable.flush().await;
    }

    /// Applies queued durable writes, then closes the adapter.
    pub async fn teardown(&self) {
        self.durable.close().await;
        info!("store: persistence closed");
    }
}

fn apply_control(list: &mut MessageList, control: &ChatLog, window: chrono::Duration) -> Option<ChatLog> {
    match control.content.content_type.as_str() {
        content_type::RECALL => {
            let recalled = list.apply_recall(control, window);
            if recalled.is_none() {
                debug!(chat_id = %control.content.text, "store: recall had no effect");
            }
            recalled
        }
        content_type::UPDATE_EXTRA => list.apply_extra(&control.content.text, control.content.extra.clone()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "../tests/store_tests.rs"]
mod tests;
