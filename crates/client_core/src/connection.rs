//! One logical connection to the chat backend.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected` loops until
//! [`Connection::shutdown`], which is terminal. A fixed-interval reconnect
//! timer is the only retry mechanism; every socket opened gets a fresh
//! generation so events from a superseded socket are ignored.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
    time::Duration,
};

use futures::future::BoxFuture;
use shared::{domain::new_chat_id, protocol::Frame};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::ClientConfig,
    error::{ConnectionError, RequestError},
    transport::{SocketEvent, TransportConnector, TransportSocket},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle changes and inbound frames, in transport delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    NetBroken(String),
    AuthError(String),
    Frame(Frame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Written to the open socket.
    Sent,
    /// Queued until the next successful connect; no response guarantee.
    Queued,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub endpoint: String,
    pub device: String,
    pub token: Option<String>,
    pub with_token_in_url: bool,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl From<&ClientConfig> for ConnectionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            device: config.device.clone(),
            token: config.token.clone(),
            with_token_in_url: config.with_token_in_url,
            reconnect_interval: config.reconnect_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            request_timeout: config.request_timeout(),
        }
    }
}

pub type AckHook = Box<dyn FnOnce(&Frame) + Send>;
pub type FailHook = Box<dyn FnOnce(&RequestError) + Send>;

/// Caller callbacks of a correlated request; exactly one of them fires.
#[derive(Default)]
pub struct RequestHooks {
    on_ack: Option<AckHook>,
    on_fail: Option<FailHook>,
}

impl RequestHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ack(mut self, hook: impl FnOnce(&Frame) + Send + 'static) -> Self {
        self.on_ack = Some(Box::new(hook));
        self
    }

    pub fn on_fail(mut self, hook: impl FnOnce(&RequestError) + Send + 'static) -> Self {
        self.on_fail = Some(Box::new(hook));
        self
    }
}

struct WaitingRequest {
    request: Frame,
    resolve: oneshot::Sender<Result<Frame, RequestError>>,
    hooks: RequestHooks,
    timer: Option<JoinHandle<()>>,
}

impl WaitingRequest {
    fn finish(self, outcome: Result<Frame, RequestError>) {
        let WaitingRequest {
            request: _,
            resolve,
            hooks,
            timer,
        } = self;
        if let Some(timer) = timer {
            timer.abort();
        }

        let RequestHooks { on_ack, on_fail } = hooks;
        match &outcome {
            Ok(response) if response.is_ok() => {
                if let Some(hook) = on_ack {
                    hook(response);
                }
            }
            Ok(response) => {
                if let Some(hook) = on_fail {
                    hook(&RequestError::Rejected {
                        code: response.code.unwrap_or_default(),
                        message: response.message.clone().unwrap_or_default(),
                    });
                }
            }
            Err(err) => {
                if let Some(hook) = on_fail {
                    hook(err);
                }
            }
        }
        let _ = resolve.send(outcome);
    }
}

struct ConnectionInner {
    state: ConnectionState,
    running: bool,
    generation: u64,
    socket: Option<Arc<dyn TransportSocket>>,
    pending: VecDeque<Frame>,
    reconnect_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

pub struct Connection {
    settings: ConnectionSettings,
    connector: Arc<dyn TransportConnector>,
    inner: Mutex<ConnectionInner>,
    waiting: Mutex<HashMap<String, WaitingRequest>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Connection {
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn TransportConnector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            settings,
            connector,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                running: true,
                generation: 0,
                socket: None,
                pending: VecDeque::new(),
                reconnect_task: None,
                heartbeat_task: None,
                reader_task: None,
            }),
            waiting: Mutex::new(HashMap::new()),
            events,
        });
        (connection, events_rx)
    }

    /// `{endpoint}/api/connect?device=..[&token=..]` on the websocket scheme.
    pub fn connection_url(&self) -> Result<String, ConnectionError> {
        let endpoint = self.settings.endpoint.trim().trim_end_matches('/');
        let ws_endpoint = if let Some(rest) = endpoint.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            endpoint.to_string()
        } else {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "endpoint must start with http(s):// or ws(s)://, got '{endpoint}'"
            )));
        };

        let mut url = Url::parse(&format!("{ws_endpoint}/api/connect"))
            .map_err(|err| ConnectionError::InvalidEndpoint(err.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("device", &self.settings.device);
            if self.settings.with_token_in_url {
                if let Some(token) = self.settings.token.as_deref().filter(|t| !t.is_empty()) {
                    query.append_pair("token", token);
                }
            }
        }
        Ok(url.to_string())
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn waiting_len(&self) -> usize {
        self.waiting.lock().await.len()
    }

    /// No-op unless disconnected and still running.
    ///
    /// Boxed because the reconnect timer it spawns calls back into it.
    pub fn connect(self: &Arc<Self>) -> BoxFuture<'_, ()> {
        Box::pin(self.connect_inner())
    }

    async fn connect_inner(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner.lock().await;
            if !inner.running || inner.state != ConnectionState::Disconnected {
                return;
            }

            let url = match self.connection_url() {
                Ok(url) => url,
                Err(err) => {
                    warn!("connection: cannot connect: {err}");
                    return;
                }
            };

            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            let generation = inner.generation;

            if inner.reconnect_task.is_none() {
                inner.reconnect_task = Some(tokio::spawn(reconnect_loop(
                    Arc::downgrade(self),
                    self.settings.reconnect_interval,
                )));
            }

            let (socket_events, socket_events_rx) = mpsc::unbounded_channel();
            inner.socket = Some(self.connector.open(&url, socket_events));
            let reader = tokio::spawn(
                Arc::clone(self).pump_socket_events(generation, socket_events_rx),
            );
            if let Some(previous) = inner.reader_task.replace(reader) {
                previous.abort();
            }
            generation
        };

        info!(generation, device = %self.settings.device, "connection: connecting");
        self.emit(ConnectionEvent::Connecting);
    }

    async fn pump_socket_events(
        self: Arc<Self>,
        generation: u64,
        mut socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        while let Some(event) = socket_events.recv().await {
            match event {
                SocketEvent::Open => self.on_open(generation).await,
                SocketEvent::Message(text) => {
                    if !self.is_current(generation).await {
                        return;
                    }
                    match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => self.emit(ConnectionEvent::Frame(frame)),
                        Err(err) => warn!(generation, "connection: dropping unparseable frame: {err}"),
                    }
                }
                SocketEvent::Unauthorized(reason) => {
                    self.on_unauthorized(generation, reason).await;
                    return;
                }
                SocketEvent::Error(reason) | SocketEvent::Close(reason) => {
                    self.on_broken(generation, reason).await;
                    return;
                }
            }
        }
        self.on_broken(generation, "transport dropped".into()).await;
    }

    async fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner.lock().await;
        inner.running && inner.generation == generation
    }

    async fn on_open(self: &Arc<Self>, generation: u64) {
        let flushed = {
            let mut inner = self.inner.lock().await;
            if !inner.running
                || inner.generation != generation
                || inner.state != ConnectionState::Connecting
            {
                return;
            }
            inner.state = ConnectionState::Connected;
            let Some(socket) = inner.socket.clone() else {
                return;
            };

            let mut flushed = 0usize;
            while let Some(frame) = inner.pending.pop_front() {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("connection: dropping unencodable queued frame: {err}");
                        continue;
                    }
                };
                if let Err(err) = socket.send(text) {
                    warn!(generation, "connection: flush interrupted: {err}");
                    inner.pending.push_front(frame);
                    break;
                }
                flushed += 1;
            }

            let heartbeat = tokio::spawn(heartbeat_loop(
                Arc::downgrade(self),
                generation,
                self.settings.heartbeat_interval,
            ));
            if let Some(previous) = inner.heartbeat_task.replace(heartbeat) {
                previous.abort();
            }
            flushed
        };

        info!(generation, flushed, "connection: connected");
        self.emit(ConnectionEvent::Connected);
    }

    async fn on_broken(&self, generation: u64, reason: String) {
        let running = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.state == ConnectionState::Disconnected {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            if let Some(socket) = inner.socket.take() {
                socket.close();
            }
            if let Some(heartbeat) = inner.heartbeat_task.take() {
                heartbeat.abort();
            }
            inner.running
        };

        warn!(generation, %reason, "connection: net broken");
        if running {
            self.emit(ConnectionEvent::NetBroken(reason));
        }
    }

    async fn on_unauthorized(&self, generation: u64, reason: String) {
        if !self.is_current(generation).await {
            return;
        }
        warn!(generation, %reason, "connection: credentials rejected, shutting down");
        self.emit(ConnectionEvent::AuthError(reason));
        self.shutdown().await;
    }

    /// Terminal: closes the transport, stops both timers and fails every
    /// outstanding request.
    pub async fn shutdown(&self) {
        let (socket, tasks) = {
            let mut inner = self.inner.lock().await;
            if !inner.running {
                return;
            }
            inner.running = false;
            inner.state = ConnectionState::Disconnected;
            inner.generation += 1;
            inner.pending.clear();
            let tasks = [
                inner.heartbeat_task.take(),
                inner.reconnect_task.take(),
                inner.reader_task.take(),
            ];
            (inner.socket.take(), tasks)
        };

        if let Some(socket) = socket {
            socket.close();
        }

        let outstanding: Vec<WaitingRequest> = {
            let mut waiting = self.waiting.lock().await;
            waiting.drain().map(|(_, record)| record).collect()
        };
        for record in outstanding {
            record.finish(Err(RequestError::Shutdown));
        }

        info!("connection: shutdown");
        // Aborted last: shutdown may run on the reader task itself.
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
    }

    /// Writes `frame` when connected; otherwise queues it (when `retry`) and
    /// kicks a connect.
    pub async fn do_send_request(
        self: &Arc<Self>,
        frame: Frame,
        retry: bool,
    ) -> Result<SendStatus, ConnectionError> {
        {
            let mut inner = self.inner.lock().await;
            if !inner.running {
                return Err(ConnectionError::Shutdown);
            }
            if inner.state == ConnectionState::Connected {
                if let Some(socket) = inner.socket.clone() {
                    let text = serde_json::to_string(&frame)?;
                    socket.send(text)?;
                    return Ok(SendStatus::Sent);
                }
            }
            if !retry {
                return Err(ConnectionError::NotConnected);
            }
            inner.pending.push_back(frame);
        }

        self.connect().await;
        Ok(SendStatus::Queued)
    }

    /// Sends `frame` and resolves with the first of: matching response, send
    /// failure, or timeout. A response arriving later is logged and ignored.
    pub async fn send_and_wait_response(
        self: &Arc<Self>,
        mut frame: Frame,
        hooks: RequestHooks,
    ) -> Result<Frame, RequestError> {
        let chat_id = frame
            .chat_id()
            .map(str::to_string)
            .unwrap_or_else(new_chat_id);
        frame.chat_id = Some(chat_id.clone());

        let (resolve, resolved) = oneshot::channel();
        let previous = self.waiting.lock().await.insert(
            chat_id.clone(),
            WaitingRequest {
                request: frame.clone(),
                resolve,
                hooks,
                timer: None,
            },
        );
        if let Some(previous) = previous {
            warn!(%chat_id, "connection: request superseded by a resend with the same chat id");
            previous.finish(Err(RequestError::Dropped));
        }

        let timer = tokio::spawn(request_timeout(
            Arc::downgrade(self),
            chat_id.clone(),
            self.settings.request_timeout,
        ));
        match self.waiting.lock().await.get_mut(&chat_id) {
            Some(record) => record.timer = Some(timer),
            None => timer.abort(),
        }

        if let Err(err) = self.do_send_request(frame, true).await {
            self.settle(&chat_id, Err(err.into())).await;
        }

        resolved.await.unwrap_or(Err(RequestError::Dropped))
    }

    /// Routes a `resp` frame to the request waiting on its `chatId`.
    pub async fn resolve_response(&self, response: Frame) -> bool {
        let Some(chat_id) = response.chat_id().map(str::to_string) else {
            debug!("connection: response without chat id");
            return false;
        };
        self.settle(&chat_id, Ok(response)).await
    }

    async fn settle(&self, chat_id: &str, outcome: Result<Frame, RequestError>) -> bool {
        let record = self.waiting.lock().await.remove(chat_id);
        match record {
            Some(record) => {
                record.finish(outcome);
                true
            }
            None => {
                info!(chat_id, "connection: ignoring outcome for already settled request");
                false
            }
        }
    }

    async fn expire(&self, chat_id: &str) {
        let record = self.waiting.lock().await.remove(chat_id);
        if let Some(mut record) = record {
            // The timer is the running task; dropping the handle just detaches it.
            record.timer = None;
            warn!(
                chat_id,
                topic_id = ?record.request.topic_id,
                "connection: request timed out"
            );
            record.finish(Err(RequestError::Timeout));
        }
    }

    async fn send_heartbeat(&self, generation: u64) -> bool {
        let inner = self.inner.lock().await;
        if !inner.running
            || inner.generation != generation
            || inner.state != ConnectionState::Connected
        {
            return false;
        }
        let Some(socket) = inner.socket.as_ref() else {
            return false;
        };
        match serde_json::to_string(&Frame::nop()) {
            Ok(text) => {
                if let Err(err) = socket.send(text) {
                    debug!(generation, "connection: heartbeat send failed: {err}");
                }
            }
            Err(err) => debug!("connection: heartbeat encode failed: {err}"),
        }
        true
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

async fn reconnect_loop(connection: Weak<Connection>, period: Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(connection) = connection.upgrade() else {
            return;
        };
        let (running, state) = {
            let inner = connection.inner.lock().await;
            (inner.running, inner.state)
        };
        if !running {
            return;
        }
        if state == ConnectionState::Disconnected {
            info!("connection: reconnecting");
            connection.connect().await;
        }
    }
}

async fn heartbeat_loop(connection: Weak<Connection>, generation: u64, period: Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(connection) = connection.upgrade() else {
            return;
        };
        if !connection.send_heartbeat(generation).await {
            return;
        }
    }
}

async fn request_timeout(connection: Weak<Connection>, chat_id: String, after: Duration) {
    time::sleep(after).await;
    if let Some(connection) = connection.upgrade() {
        connection.expire(&chat_id).await;
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
