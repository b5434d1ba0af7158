//! Single-task writer in front of the persistence adapter.
//!
//! Loads, saves, deletes and clears are applied strictly in the order they
//! were issued, so a clear can never be overtaken by an earlier save.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use shared::domain::{ChatLog, ChatLogStatus, TopicId};
use storage::ChatLogPersistence;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum DurableOp {
    Load {
        topic_id: TopicId,
        reply: oneshot::Sender<Result<Vec<ChatLog>>>,
    },
    Save {
        topic_id: TopicId,
        logs: Vec<ChatLog>,
    },
    Delete {
        topic_id: TopicId,
        chat_id: String,
    },
    Clear {
        topic_id: TopicId,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

pub(crate) struct DurableWriter {
    ops: mpsc::UnboundedSender<DurableOp>,
    durable: bool,
}

impl DurableWriter {
    /// Must be called inside a tokio runtime.
    pub(crate) fn spawn(persistence: Arc<dyn ChatLogPersistence>) -> Self {
        let durable = persistence.is_durable();
        let (ops, ops_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(persistence, ops_rx));
        Self { ops, durable }
    }

    /// Queues an upsert; provisional `Sending` copies are skipped.
    pub(crate) fn save(&self, topic_id: &TopicId, logs: Vec<ChatLog>) {
        if !self.durable {
            return;
        }
        let logs: Vec<ChatLog> = logs
            .into_iter()
            .filter(|log| log.status != ChatLogStatus::Sending)
            .collect();
        if logs.is_empty() {
            return;
        }
        self.submit(DurableOp::Save {
            topic_id: topic_id.clone(),
            logs,
        });
    }

    pub(crate) fn delete(&self, topic_id: &TopicId, chat_id: &str) {
        if self.durable {
            self.submit(DurableOp::Delete {
                topic_id: topic_id.clone(),
                chat_id: chat_id.to_string(),
            });
        }
    }

    pub(crate) fn clear(&self, topic_id: &TopicId) {
        if self.durable {
            self.submit(DurableOp::Clear {
                topic_id: topic_id.clone(),
            });
        }
    }

    /// Reads after every write queued before it.
    pub(crate) async fn load(&self, topic_id: &TopicId) -> Result<Vec<ChatLog>> {
        let (reply, replied) = oneshot::channel();
        self.ops
            .send(DurableOp::Load {
                topic_id: topic_id.clone(),
                reply,
            })
            .map_err(|_| anyhow!("durable writer has stopped"))?;
        replied
            .await
            .map_err(|_| anyhow!("durable writer has stopped"))?
    }

    /// Resolves once every write queued so far has been applied.
    pub(crate) async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.ops.send(DurableOp::Flush { done }).is_ok() {
            let _ = flushed.await;
        }
    }

    /// Drains the queue, then closes the adapter.
    pub(crate) async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.ops.send(DurableOp::Close { done }).is_ok() {
            let _ = closed.await;
        }
    }

    fn submit(&self, op: DurableOp) {
        if self.ops.send(op).is_err() {
            debug!("store: durable writer has stopped, write dropped");
        }
    }
}

async fn run_writer(persistence: Arc<dyn ChatLogPersistence>, mut ops: mpsc::UnboundedReceiver<DurableOp>) {
    while let Some(op) = ops.recv().await {
        match op {
            DurableOp::Load { topic_id, reply } => {
                let _ = reply.send(persistence.load(&topic_id).await);
            }
            DurableOp::Save { topic_id, logs } => {
                if let Err(err) = persistence.save(&topic_id, &logs).await {
                    warn!(topic_id = %topic_id, count = logs.len(), "store: durable save failed: {err:#}");
                }
            }
            DurableOp::Delete { topic_id, chat_id } => {
                if let Err(err) = persistence.delete(&topic_id, &chat_id).await {
                    warn!(topic_id = %topic_id, %chat_id, "store: durable delete failed: {err:#}");
                }
            }
            DurableOp::Clear { topic_id } => {
                if let Err(err) = persistence.clear(&topic_id).await {
                    warn!(topic_id = %topic_id, "store: durable clear failed: {err:#}");
                }
            }
            DurableOp::Flush { done } => {
                let _ = done.send(());
            }
            DurableOp::Close { done } => {
                persistence.close().await;
                let _ = done.send(());
                break;
            }
        }
    }
}
