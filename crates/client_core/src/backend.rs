use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Conversation, Topic, TopicId, UserId, UserProfile},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{ChatListPage, ChatListQuery, ChatLogPage, ChatLogQuery, RemoveMessagesRequest},
};

/// HTTP calls of the chat backend consumed by the store.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn get_chat_list(&self, updated_at: Option<&str>, limit: u32) -> Result<ChatListPage>;
    /// History of a topic, newest first, at or below `last_seq` (`0` = latest).
    async fn get_chat_logs_desc(
        &self,
        topic_id: &TopicId,
        last_seq: u64,
        limit: u32,
    ) -> Result<ChatLogPage>;
    async fn get_topic(&self, topic_id: &TopicId) -> Result<Topic>;
    async fn get_conversation(&self, topic_id: &TopicId) -> Result<Conversation>;
    async fn delete_messages(&self, topic_id: &TopicId, chat_ids: &[String]) -> Result<()>;
    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile>;
}

pub struct HttpBackend {
    http: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.endpoint);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiError>(&raw) {
                Ok(api_error) => api_error.message,
                Err(_) => raw,
            };
            return Err(ApiException::new(
                status.as_u16(),
                ErrorCode::from_status(status.as_u16()),
                message,
            )
            .into());
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("invalid response body from {url}"))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn get_chat_list(&self, updated_at: Option<&str>, limit: u32) -> Result<ChatListPage> {
        self.post(
            "/api/chat/list",
            &ChatListQuery {
                updated_at: updated_at.map(str::to_string),
                limit,
            },
        )
        .await
    }

    async fn get_chat_logs_desc(
        &self,
        topic_id: &TopicId,
        last_seq: u64,
        limit: u32,
    ) -> Result<ChatLogPage> {
        self.post(
            &format!("/api/chat/sync/{topic_id}"),
            &ChatLogQuery { last_seq, limit },
        )
        .await
    }

    async fn get_topic(&self, topic_id: &TopicId) -> Result<Topic> {
        let topic: Topic = self
            .post(&format!("/api/topic/info/{topic_id}"), &serde_json::json!({}))
            .await?;
        if topic.id != *topic_id {
            return Err(anyhow!(
                "server returned topic {} for request {topic_id}",
                topic.id
            ));
        }
        Ok(topic)
    }

    async fn get_conversation(&self, topic_id: &TopicId) -> Result<Conversation> {
        self.post(&format!("/api/chat/info/{topic_id}"), &serde_json::json!({}))
            .await
    }

    async fn delete_messages(&self, topic_id: &TopicId, chat_ids: &[String]) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                &format!("/api/chat/remove_messages/{topic_id}"),
                &RemoveMessagesRequest {
                    ids: chat_ids.to_vec(),
                },
            )
            .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile> {
        self.post(&format!("/api/profile/{user_id}"), &serde_json::json!({}))
            .await
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
