//! Error types for ridewire.

use thiserror::Error;

use crate::protocol::MessageType;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Operation issued before `connect()` or after shutdown.
    #[error("client is not connected")]
    NotConnected,

    /// Socket-level failure (connect, read, or write).
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Connection was torn down while the operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived within the configured window.
    #[error("timed out waiting for a response")]
    Timeout,

    /// Server replied with an Error message; carries its UTF-8 text.
    #[error("server error: {0}")]
    Server(String),

    /// Server replied with the wrong message type for the request sent.
    #[error("unexpected response type: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        expected: MessageType,
        actual: MessageType,
    },

    /// Fatal protocol violation; the connection is unusable afterwards.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Response correlates to no pending request. Reported and discarded.
    #[error("response for unknown request id {0}")]
    UnknownRequestId(u32),

    /// A request with this id is already awaiting a response.
    #[error("request id {0} is already pending")]
    DuplicateRequestId(u32),

    /// Typed payload reader used on the wrong message type.
    #[error("payload of a {0:?} message cannot be read as the requested type")]
    InvalidPayloadType(MessageType),
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
