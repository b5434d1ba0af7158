use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::debug;

use super::{SocketEvent, SocketEventSender, TransportConnector, TransportSocket};
use crate::error::ConnectionError;

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

enum Outbound {
    Text(String),
    Close,
}

struct WebSocketHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: AbortHandle,
}

impl TransportSocket for WebSocketHandle {
    fn send(&self, text: String) -> Result<(), ConnectionError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| ConnectionError::Transport("websocket writer is closed".into()))
    }

    fn close(&self) {
        if self.outbound.send(Outbound::Close).is_err() {
            self.task.abort();
        }
    }
}

impl TransportConnector for WebSocketConnector {
    fn open(&self, url: &str, events: SocketEventSender) -> Arc<dyn TransportSocket> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(url.to_string(), outbound_rx, events));
        Arc::new(WebSocketHandle {
            outbound,
            task: task.abort_handle(),
        })
    }
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: SocketEventSender,
) {
    let ws_stream = match connect_async(&url).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 401 => {
            let _ = events.send(SocketEvent::Unauthorized(format!(
                "websocket upgrade rejected: {}",
                response.status()
            )));
            return;
        }
        Err(err) => {
            let _ = events.send(SocketEvent::Error(format!(
                "failed to connect websocket: {err}"
            )));
            return;
        }
    };
    let _ = events.send(SocketEvent::Open);
    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = ws_writer.send(Message::Text(text)).await {
                        let _ = events.send(SocketEvent::Error(format!("websocket send failed: {err}")));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = ws_writer.send(Message::Close(None)).await;
                    let _ = events.send(SocketEvent::Close("closed by client".into()));
                    break;
                }
            },
            incoming = ws_reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = events.send(SocketEvent::Message(text));
                    }
                    Err(_) => debug!("websocket: dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".into());
                    let _ = events.send(SocketEvent::Close(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = events.send(SocketEvent::Error(format!("websocket receive failed: {err}")));
                    break;
                }
                None => {
                    let _ = events.send(SocketEvent::Close("websocket stream ended".into()));
                    break;
                }
            }
        }
    }
}
