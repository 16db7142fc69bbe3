//! Protocol error types.

use thiserror::Error;

/// Protocol error type.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Text is not a JSON envelope with a string `action`.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// Envelope is fine but `data` does not fit the action.
    #[error("Invalid payload for '{action}': {source}")]
    InvalidPayload {
        action: String,
        #[source]
        source: serde_json::Error,
    },

    /// Authentication reply is missing the field its mode needs.
    #[error("Authentication response is missing '{0}'")]
    MissingCredential(&'static str),

    /// Serializing an outbound message failed.
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// The action whose payload failed to decode, if any.
    pub fn action(&self) -> Option<&str> {
        match self {
            ProtocolError::InvalidPayload { action, .. } => Some(action),
            _ => None,
        }
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
