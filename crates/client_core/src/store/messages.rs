use serde_json::Value;
use shared::{
    domain::{ChatLog, ChatLogStatus, Content},
    protocol::content_type,
};

/// One topic's message history, always sorted by [`ChatLog::order_cmp`] with
/// unique `chat_id`s.
#[derive(Debug, Clone, Default)]
pub struct MessageList {
    logs: Vec<ChatLog>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn as_slice(&self) -> &[ChatLog] {
        &self.logs
    }

    pub fn last_seq(&self) -> u64 {
        self.logs.iter().map(|log| log.seq).max().unwrap_or(0)
    }

    pub fn get(&self, chat_id: &str) -> Option<&ChatLog> {
        self.logs.iter().find(|log| log.chat_id == chat_id)
    }

    /// Upserts by `chat_id` then restores the order. Idempotent.
    pub fn update_messages(&mut self, incoming: impl IntoIterator<Item = ChatLog>) {
        for log in incoming {
            match self.logs.iter_mut().find(|existing| existing.chat_id == log.chat_id) {
                Some(existing) => *existing = log,
                None => self.logs.push(log),
            }
        }
        self.logs.sort_by(ChatLog::order_cmp);
    }

    pub fn remove(&mut self, chat_id: &str) -> Option<ChatLog> {
        let index = self.logs.iter().position(|log| log.chat_id == chat_id)?;
        Some(self.logs.remove(index))
    }

    pub fn clear(&mut self) {
        self.logs.clear();
    }

    /// The `limit` server-confirmed entries ending at the entry with
    /// `seq == last_seq`, when the whole window is cached and contiguous
    /// (`end - start <= limit`). Unconfirmed outgoing copies never count.
    pub fn window(&self, last_seq: u64, limit: usize) -> Option<Vec<ChatLog>> {
        if limit == 0 {
            return None;
        }
        let confirmed: Vec<&ChatLog> = self
            .logs
            .iter()
            .filter(|log| !matches!(log.status, ChatLogStatus::Sending | ChatLogStatus::Failed))
            .collect();
        let end = confirmed.iter().rposition(|log| log.seq == last_seq)?;
        if end + 1 < limit {
            return None;
        }
        let window = &confirmed[end + 1 - limit..=end];
        let start_seq = window.first()?.seq;
        let end_seq = window.last()?.seq;
        if end_seq - start_seq > limit as u64 {
            return None;
        }
        Some(window.iter().map(|log| (*log).clone()).collect())
    }

    /// Appends the message each control entry targets, so callers always see
    /// the current rendering of a recalled or edited message.
    pub fn expand_controls(&self, window: Vec<ChatLog>) -> Vec<ChatLog> {
        let mut targets = Vec::new();
        for log in window.iter().filter(|log| log.content.is_control()) {
            let target_id = log.content.text.as_str();
            let already_present = window.iter().any(|l| l.chat_id == target_id)
                || targets.iter().any(|l: &ChatLog| l.chat_id == target_id);
            if already_present {
                continue;
            }
            if let Some(target) = self.get(target_id) {
                targets.push(target.clone());
            }
        }
        let mut expanded = window;
        expanded.extend(targets);
        expanded
    }

    /// Applies a recall control entry; returns the recalled target on success.
    ///
    /// Succeeds only when the target is not yet recalled, the recaller is its
    /// sender, and the recall is issued at most `window` after the target was
    /// created.
    pub fn apply_recall(
        &mut self,
        recall: &ChatLog,
        window: chrono::Duration,
    ) -> Option<ChatLog> {
        let target_id = recall.content.text.as_str();
        let target = self.logs.iter_mut().find(|log| log.chat_id == target_id)?;
        if target.recall || target.sender_id != recall.sender_id {
            return None;
        }
        if recall.created_at - target.created_at > window {
            return None;
        }
        target.recall = true;
        target.content = Content::new(content_type::RECALLED);
        Some(target.clone())
    }

    /// Overwrites only the `extra` of the target message.
    pub fn apply_extra(&mut self, target_id: &str, extra: Option<Value>) -> Option<ChatLog> {
        let target = self.logs.iter_mut().find(|log| log.chat_id == target_id)?;
        target.content.extra = extra;
        Some(target.clone())
    }
}
