//! Error types for the relay-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or validating protocol frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a message.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The envelope declared a type outside the known catalog.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Missing or empty required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;
