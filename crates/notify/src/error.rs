//! Notification client error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur while synchronizing notifications.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Connection-related errors (handshake, transport loss, namespace refusal)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed Engine.IO / Socket.IO frames or unexpected response bodies
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Non-success HTTP status from the notification service
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level HTTP failure
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An emit was attempted while the channel was not ready
    #[error("Channel is not connected")]
    NotConnected,

    /// The connection task has stopped
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl NotifyError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether a failed request is worth retrying.
    ///
    /// Client errors (4xx) and malformed bodies are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Connection(_) | Self::WebSocket(_) => true,
            _ => false,
        }
    }
}
