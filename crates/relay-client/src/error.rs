//! Error types for the session client.

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::http::StatusCode;

/// Errors that can occur in the session client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The gateway refused the handshake credential.
    #[error("authentication rejected ({status}): {reason}")]
    AuthenticationRejected {
        /// HTTP status of the refused upgrade.
        status: u16,
        /// Reason text sent by the gateway.
        reason: String,
    },

    /// Network or WebSocket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A connection phase did not finish in time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The gateway sent something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The gateway URL could not be turned into a request.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The credential cannot be carried in a header.
    #[error("credential is not a valid header value")]
    InvalidCredential,

    /// The client's driver task has stopped.
    #[error("session client stopped")]
    Stopped,
}

impl ClientError {
    /// Whether a reconnect attempt could succeed after this error.
    ///
    /// Credential problems are never retried with the same credential.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::AuthenticationRejected { .. } | Self::InvalidCredential | Self::InvalidUrl(_) | Self::Stopped
        )
    }
}

impl From<WsError> for ClientError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Http(response)
                if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
            {
                let reason = response
                    .body()
                    .as_deref()
                    .and_then(|body| std::str::from_utf8(body).ok())
                    .map(str::to_string)
                    .or_else(|| response.status().canonical_reason().map(str::to_string))
                    .unwrap_or_default();
                Self::AuthenticationRejected {
                    status: response.status().as_u16(),
                    reason,
                }
            }
            WsError::Http(response) => Self::Transport(format!("handshake refused with HTTP {}", response.status())),
            WsError::Url(e) => Self::InvalidUrl(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<relay_proto::ProtoError> for ClientError {
    fn from(err: relay_proto::ProtoError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
