//! Durable mirror of per-topic message history.
//!
//! The in-memory message store is authoritative; everything here is an
//! eventually consistent copy that lets history survive restarts and serve
//! pagination without a network round-trip.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tracing::{info, warn};

use shared::domain::{ChatLog, TopicId};

#[async_trait]
pub trait ChatLogPersistence: Send + Sync {
    /// All non-deleted messages of a topic, sorted by `(seq, created_at)`.
    async fn load(&self, topic_id: &TopicId) -> Result<Vec<ChatLog>>;
    /// Upserts each message by `(topic_id, chat_id)`. Tombstoned rows stay deleted.
    async fn save(&self, topic_id: &TopicId, messages: &[ChatLog]) -> Result<()>;
    /// Soft delete: the row is flagged, not removed.
    async fn delete(&self, topic_id: &TopicId, chat_id: &str) -> Result<()>;
    async fn clear(&self, topic_id: &TopicId) -> Result<()>;
    async fn close(&self);
    fn is_durable(&self) -> bool;
}

/// Variant used when no durable store is configured or available.
pub struct MemoryOnly;

#[async_trait]
impl ChatLogPersistence for MemoryOnly {
    async fn load(&self, _topic_id: &TopicId) -> Result<Vec<ChatLog>> {
        Ok(Vec::new())
    }

    async fn save(&self, _topic_id: &TopicId, _messages: &[ChatLog]) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _topic_id: &TopicId, _chat_id: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self, _topic_id: &TopicId) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}

    fn is_durable(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct SqliteChatLogStore {
    pool: Pool<Sqlite>,
}

impl SqliteChatLogStore {
    pub async fn open(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open chat log database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to migrate chat log database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Number of rows for a topic including tombstones.
    pub async fn row_count(&self, topic_id: &TopicId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_logs WHERE topic_id = ?")
            .bind(topic_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ChatLogPersistence for SqliteChatLogStore {
    async fn load(&self, topic_id: &TopicId) -> Result<Vec<ChatLog>> {
        let rows = sqlx::query(
            "SELECT body FROM chat_logs
             WHERE topic_id = ? AND deleted = 0
             ORDER BY seq ASC, created_at_ms ASC",
        )
        .bind(topic_id.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load chat logs for topic {topic_id}"))?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.try_get("body")?;
            match serde_json::from_str::<ChatLog>(&body) {
                Ok(log) => logs.push(log),
                Err(err) => warn!(topic_id = %topic_id, "storage: skipping undecodable chat log: {err}"),
            }
        }
        logs.sort_by(ChatLog::order_cmp);
        Ok(logs)
    }

    async fn save(&self, topic_id: &TopicId, messages: &[ChatLog]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for log in messages {
            let body = serde_json::to_string(log)?;
            sqlx::query(
                "INSERT INTO chat_logs (topic_id, chat_id, seq, created_at_ms, body, deleted, updated_at)
                 VALUES (?, ?, ?, ?, ?, 0, CURRENT_TIMESTAMP)
                 ON CONFLICT(topic_id, chat_id) DO UPDATE SET
                    seq = excluded.seq,
                    created_at_ms = excluded.created_at_ms,
                    body = excluded.body,
                    updated_at = CURRENT_TIMESTAMP",
            )
            .bind(topic_id.as_str())
            .bind(&log.chat_id)
            .bind(log.seq as i64)
            .bind(log.created_at.timestamp_millis())
            .bind(body)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to save chat log {}", log.chat_id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, topic_id: &TopicId, chat_id: &str) -> Result<()> {
        // Tombstone even when the row is not mirrored yet so a later save cannot resurrect it.
        sqlx::query(
            "INSERT INTO chat_logs (topic_id, chat_id, seq, created_at_ms, body, deleted, updated_at)
             VALUES (?, ?, 0, 0, '{}', 1, CURRENT_TIMESTAMP)
             ON CONFLICT(topic_id, chat_id) DO UPDATE SET deleted = 1, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(topic_id.as_str())
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to delete chat log {chat_id}"))?;
        Ok(())
    }

    async fn clear(&self, topic_id: &TopicId) -> Result<()> {
        sqlx::query("DELETE FROM chat_logs WHERE topic_id = ?")
            .bind(topic_id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to clear chat logs for topic {topic_id}"))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Opens the configured durable store, falling back to [`MemoryOnly`] when no
/// url is given or the database cannot be opened.
pub async fn open_persistence(database_url: Option<&str>) -> Arc<dyn ChatLogPersistence> {
    let Some(database_url) = database_url.filter(|url| !url.trim().is_empty()) else {
        return Arc::new(MemoryOnly);
    };

    match SqliteChatLogStore::open(database_url).await {
        Ok(store) => {
            info!(database_url, "storage: durable chat log cache opened");
            Arc::new(store)
        }
        Err(err) => {
            warn!(database_url, "storage: durable cache unavailable, using memory only: {err:#}");
            Arc::new(MemoryOnly)
        }
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
