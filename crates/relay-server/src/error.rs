//! Error types for the gateway server.

use std::net::SocketAddr;

use thiserror::Error;

use crate::connection::{ConnectionId, ConnectionState};

/// Errors that can occur in the gateway server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// WebSocket error occurred.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Failed to serialize or deserialize a message.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Message exceeded the configured size limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// A connection was asked to move between states that are not adjacent.
    #[error("invalid connection state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// No live connection with this id.
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// Handshake authentication failed.
    #[error(transparent)]
    Auth(#[from] relay_auth::AuthError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Channel send error.
    #[error("channel send error: {0}")]
    ChannelSend(String),
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<relay_proto::ProtoError> for ServerError {
    fn from(err: relay_proto::ProtoError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<relay_ratelimit::RateLimitError> for ServerError {
    fn from(err: relay_ratelimit::RateLimitError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
