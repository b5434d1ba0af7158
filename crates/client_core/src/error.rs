use shared::domain::TopicId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is shutdown")]
    Shutdown,
    #[error("connection is not established")]
    NotConnected,
    #[error("transport send failed: {0}")]
    Transport(String),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Outcome delivered to the fail hook of a correlated request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("connection is shutdown")]
    Shutdown,
    #[error("request timed out waiting for a response")]
    Timeout,
    #[error("request rejected with code {code}: {message}")]
    Rejected { code: u16, message: String },
    #[error("request send failed: {0}")]
    Send(String),
    #[error("request was dropped before resolution")]
    Dropped,
}

impl From<ConnectionError> for RequestError {
    fn from(value: ConnectionError) -> Self {
        match value {
            ConnectionError::Shutdown => RequestError::Shutdown,
            other => RequestError::Send(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("unknown topic {0}")]
    UnknownTopic(TopicId),
    #[error("backend call failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}
