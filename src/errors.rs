//! Error types for the voice client.
//!
//! Every fallible operation in the crate returns [`ClientResult`]. The variants
//! follow the session lifecycle: connection and transport failures end the
//! session, device failures end the local flow that hit them, and decode
//! failures only cost the offending message.

use thiserror::Error;

/// Errors that can occur while running a voice session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting or completing the WebSocket handshake failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Sending on a closed or broken connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Capture or playback device failure
    #[error("Audio device error: {0}")]
    Device(String),

    /// Malformed inbound protocol message
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::ProtocolDecode(err.to_string())
    }
}

impl From<base64::DecodeError> for ClientError {
    fn from(err: base64::DecodeError) -> Self {
        ClientError::ProtocolDecode(format!("invalid base64 audio: {err}"))
    }
}
