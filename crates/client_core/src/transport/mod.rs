//! Uniform event interface over a platform bidirectional text stream.
//!
//! A connector opens a socket and reports its lifecycle through
//! [`SocketEvent`]s on the supplied channel: `Open` once the stream is usable,
//! `Message` per inbound text frame, and exactly one terminal `Close`,
//! `Error` or `Unauthorized`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ConnectionError;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryPeer};
pub use websocket::WebSocketConnector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Error(String),
    Close(String),
    /// The endpoint refused the credentials carried by the connect url.
    Unauthorized(String),
}

pub type SocketEventSender = mpsc::UnboundedSender<SocketEvent>;

pub trait TransportSocket: Send + Sync {
    fn send(&self, text: String) -> Result<(), ConnectionError>;
    fn close(&self);
}

pub trait TransportConnector: Send + Sync {
    /// Starts opening `url`; completion is signalled by `SocketEvent::Open`.
    fn open(&self, url: &str, events: SocketEventSender) -> Arc<dyn TransportSocket>;
}
