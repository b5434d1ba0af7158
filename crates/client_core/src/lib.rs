//! Real-time chat client core.
//!
//! [`ChatClient`] ties the session [`Connection`], the protocol
//! [`Dispatcher`] and the [`ChatStore`] together. Inbound frames are handled
//! strictly in delivery order by a single dispatch task; outbound commands run
//! on the caller's task and await their correlated response.

use std::sync::Arc;

use shared::domain::{ChatLog, Conversation, Topic, TopicId, UserId, UserProfile};
use storage::ChatLogPersistence;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::info;

pub mod backend;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod store;
pub mod transport;

pub use backend::{BackendApi, HttpBackend};
pub use commands::SendOptions;
pub use config::{load_settings, ClientConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionState, RequestHooks, SendStatus};
pub use dispatcher::Dispatcher;
pub use error::{ClientError, ConnectionError, RequestError};
pub use events::{BroadcastEventHandler, ChatEventHandler, ClientEvent, MessageAck, NoopEventHandler};
pub use store::{ChatStore, MergeOutcome};
pub use transport::{MemoryConnector, MemoryPeer, TransportConnector, WebSocketConnector};

pub struct ChatClient {
    config: ClientConfig,
    connection: Arc<Connection>,
    store: Arc<ChatStore>,
    handler: Arc<dyn ChatEventHandler>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Wires the components and starts the dispatch task; must be called
    /// inside a tokio runtime. Nothing connects until [`ChatClient::connect`].
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn TransportConnector>,
        backend: Arc<dyn BackendApi>,
        persistence: Arc<dyn ChatLogPersistence>,
        handler: Arc<dyn ChatEventHandler>,
    ) -> Arc<Self> {
        let (connection, events) = Connection::new((&config).into(), connector);
        let store = Arc::new(ChatStore::new((&config).into(), backend, persistence));
        let dispatcher = Dispatcher::new(Arc::clone(&connection), Arc::clone(&store), Arc::clone(&handler));
        let dispatch_task = tokio::spawn(run_dispatch(dispatcher, events));

        Arc::new(Self {
            config,
            connection,
            store,
            handler,
            dispatch_task: Mutex::new(Some(dispatch_task)),
        })
    }

    /// Websocket transport, HTTP backend and the configured persistence.
    pub async fn from_config(config: ClientConfig, handler: Arc<dyn ChatEventHandler>) -> Arc<Self> {
        let backend = Arc::new(HttpBackend::new(config.endpoint.clone(), config.token.clone()));
        let persistence = storage::open_persistence(config.database_url.as_deref()).await;
        Self::new(config, Arc::new(WebSocketConnector), backend, persistence, handler)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn user_id(&self) -> &UserId {
        &self.config.user_id
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub async fn connect(&self) {
        self.connection.connect().await;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    /// Terminal for the session; cached state stays readable.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }

    /// Shuts down, stops dispatching and closes the persistence adapter.
    pub async fn teardown(&self) {
        self.connection.shutdown().await;
        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }
        self.store.teardown().await;
        info!("client: torn down");
    }

    pub async fn get_topic(&self, topic_id: &TopicId) -> Result<Topic, ClientError> {
        self.store.get_topic(topic_id).await
    }

    /// Resolves a sender's profile, cache first.
    pub async fn get_user(&self, user_id: &UserId) -> Result<UserProfile, ClientError> {
        self.store.get_user(user_id).await
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.store.conversations().await
    }

    pub async fn get_conversation(&self, topic_id: &TopicId) -> Option<Conversation> {
        self.store.get_conversation(topic_id).await
    }

    pub async fn fetch_conversation(&self, topic_id: &TopicId) -> Result<Conversation, ClientError> {
        let conversation = self.store.fetch_conversation(topic_id).await?;
        self.handler.on_conversation_updated(&conversation);
        Ok(conversation)
    }

    pub async fn remove_conversation(&self, topic_id: &TopicId) -> Option<Conversation> {
        let removed = self.store.remove_conversation(topic_id).await;
        if removed.is_some() {
            self.handler.on_conversation_removed(topic_id);
        }
        removed
    }

    /// Snapshot of the cached history of a topic.
    pub async fn messages(&self, topic_id: &TopicId) -> Vec<ChatLog> {
        self.store.messages(topic_id).await
    }
}

async fn run_dispatch(dispatcher: Dispatcher, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        dispatcher.handle_event(event).await;
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
