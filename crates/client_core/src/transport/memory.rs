//! In-process transport whose server side is driven by the caller.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::protocol::Frame;
use tokio::sync::mpsc;

use super::{SocketEvent, SocketEventSender, TransportConnector, TransportSocket};
use crate::error::ConnectionError;

pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Each `open` call hands a fresh [`MemoryPeer`] to the returned receiver.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        (Self { peers }, peers_rx)
    }
}

impl TransportConnector for MemoryConnector {
    fn open(&self, url: &str, events: SocketEventSender) -> Arc<dyn TransportSocket> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.peers.send(MemoryPeer {
            url: url.to_string(),
            events,
            outbound: outbound_rx,
            closed: Arc::clone(&closed),
        });
        Arc::new(MemorySocket { outbound, closed })
    }
}

struct MemorySocket {
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl TransportSocket for MemorySocket {
    fn send(&self, text: String) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("memory socket is closed".into()));
        }
        self.outbound
            .send(text)
            .map_err(|_| ConnectionError::Transport("memory peer is gone".into()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server end of one opened memory socket.
pub struct MemoryPeer {
    pub url: String,
    events: SocketEventSender,
    outbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    pub fn accept(&self) {
        let _ = self.events.send(SocketEvent::Open);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Message(text.into()));
    }

    pub fn push_frame(&self, frame: &Frame) {
        if let Ok(text) = serde_json::to_string(frame) {
            self.push_text(text);
        }
    }

    pub fn drop_connection(&self, reason: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Close(reason.into()));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Error(reason.into()));
    }

    pub fn reject_unauthorized(&self) {
        let _ = self
            .events
            .send(SocketEvent::Unauthorized("invalid token".into()));
    }

    /// Next frame written by the client; `None` once the client side is gone.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        while let Some(text) = self.outbound.recv().await {
            if let Ok(frame) = serde_json::from_str(&text) {
                return Some(frame);
            }
        }
        None
    }

    pub fn try_next_frame(&mut self) -> Option<Frame> {
        while let Ok(text) = self.outbound.try_recv() {
            if let Ok(frame) = serde_json::from_str(&text) {
                return Some(frame);
            }
        }
        None
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
