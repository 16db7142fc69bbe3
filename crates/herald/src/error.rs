//! Error types for herald.

use herald_protocol::ProtocolError;
use herald_store::StoreError;
use thiserror::Error;

/// Top-level herald error type.
#[derive(Error, Debug)]
pub enum HeraldError {
    /// Store gateway error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error (socket accept, handshake)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error (listener bind)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for herald operations.
pub type HeraldResult<T> = Result<T, HeraldError>;

/// Failure of a single `send` on a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The physical write failed; the writer has stopped.
    #[error("Transport write failed: {0}")]
    Transport(String),

    /// The connection was already closed.
    #[error("Connection closed")]
    Closed,

    /// The message could not be serialized.
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Read or write failure on the physical channel.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer sent a close frame or the stream ended.
    #[error("Peer closed the connection")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Recoverable failure of a client action, reported back as `*_failed`.
#[derive(Error, Debug)]
pub enum RequestError {
    /// Malformed or unacceptable input
    #[error("{0}")]
    Validation(String),

    /// Would violate a uniqueness rule
    #[error("{0}")]
    Conflict(String),

    /// Referenced entity does not exist or is not the caller's
    #[error("{0}")]
    NotFound(String),

    /// Durable store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Text sent to clients when the store fails underneath a request.
pub const STORE_FAILURE_MESSAGE: &str = "Internal server error";

impl RequestError {
    /// Message shown to the client. Store details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            RequestError::Store(_) => STORE_FAILURE_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type for client actions.
pub type RequestResult<T> = Result<T, RequestError>;
