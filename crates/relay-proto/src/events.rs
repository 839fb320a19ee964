//! Gateway-to-client frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, ProtoResult};

/// Machine-readable error codes carried by acknowledgments and `ERROR` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, unknown type, or missing required fields.
    InvalidFormat,
    /// Per-identity message budget exhausted for the current window.
    RateLimitExceeded,
    /// Frame exceeded the configured maximum message size.
    MessageTooLarge,
}

impl ErrorCode {
    /// Returns the wire name of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
        }
    }

    /// Returns the human-readable text sent alongside the code.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidFormat => "Invalid message format",
            Self::RateLimitExceeded => "Rate limit exceeded",
            Self::MessageTooLarge => "Message too large",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remaining budget reported with an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Messages still allowed in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_time: DateTime<Utc>,
}

/// Body of an `ERROR` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Human-readable error.
    pub error: String,
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Seconds until a rate-limited sender may retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Correlation id of the offending message, when it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ErrorEvent {
    /// Creates an error with the code's standard text.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error: code.message().to_string(),
            code,
            retry_after: None,
            message_id: None,
        }
    }

    /// `INVALID_FORMAT` error.
    #[must_use]
    pub fn invalid_format() -> Self {
        Self::new(ErrorCode::InvalidFormat)
    }

    /// `RATE_LIMIT_EXCEEDED` error with a retry hint.
    #[must_use]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(ErrorCode::RateLimitExceeded).with_retry_after(retry_after_secs)
    }

    /// `MESSAGE_TOO_LARGE` error.
    #[must_use]
    pub fn message_too_large() -> Self {
        Self::new(ErrorCode::MessageTooLarge)
    }

    /// Sets the retry hint.
    #[must_use]
    pub const fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_message_id(mut self, id: Option<String>) -> Self {
        self.message_id = id;
        self
    }
}

/// Direct reply to a message that requested one.
///
/// Either `received` is true and `rate_limit` is present, or `error`/`code`
/// are set; never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    /// True when the message was accepted for handling.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub received: bool,
    /// Correlation id, client-supplied or generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Server time of the decision.
    pub timestamp: DateTime<Utc>,
    /// Budget left after accepting the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
    /// Rejection text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rejection code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Seconds until a rate-limited sender may retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl Acknowledgment {
    /// Acknowledgment for an accepted message.
    #[must_use]
    pub fn accepted(message_id: impl Into<String>, rate_limit: RateLimitInfo) -> Self {
        Self {
            received: true,
            message_id: Some(message_id.into()),
            timestamp: Utc::now(),
            rate_limit: Some(rate_limit),
            error: None,
            code: None,
            retry_after: None,
        }
    }

    /// Acknowledgment mirroring a rejection.
    #[must_use]
    pub fn rejected(error: &ErrorEvent) -> Self {
        Self {
            received: false,
            message_id: error.message_id.clone(),
            timestamp: Utc::now(),
            rate_limit: None,
            error: Some(error.error.clone()),
            code: Some(error.code),
            retry_after: error.retry_after,
        }
    }

    /// Returns true if the message was accepted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        self.received && self.code.is_none()
    }
}

/// Handler output delivered as `CHARACTER_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterResponse {
    /// Character that answered.
    pub character_id: String,
    /// Response text.
    pub response: String,
    /// Server time the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the chat message being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Change in the character's disposition, if the handler reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_shift: Option<f32>,
    /// Action the character takes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Every frame the gateway sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// First frame on every authenticated connection.
    AuthSuccess {
        /// Authenticated user.
        user_id: String,
        /// Always true.
        connected: bool,
    },
    /// Direct reply to a message with `requestAck`.
    Ack(Acknowledgment),
    /// Handler output for a chat message.
    CharacterResponse(CharacterResponse),
    /// Error broadcast to the connection.
    Error(ErrorEvent),
    /// Heartbeat probe; the client must answer with `PONG`.
    Ping {
        /// Server time.
        timestamp: DateTime<Utc>,
    },
    /// Reply to a client `PING`.
    Pong {
        /// Server time.
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// Create auth success event.
    #[must_use]
    pub fn auth_success(user_id: impl Into<String>) -> Self {
        Self::AuthSuccess {
            user_id: user_id.into(),
            connected: true,
        }
    }

    /// Create heartbeat ping.
    #[must_use]
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: Utc::now(),
        }
    }

    /// Create heartbeat pong.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Returns the wire `type` of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AuthSuccess { .. } => "AUTH_SUCCESS",
            Self::Ack(_) => "ACK",
            Self::CharacterResponse(_) => "CHARACTER_RESPONSE",
            Self::Error(_) => "ERROR",
            Self::Ping { .. } => "PING",
            Self::Pong { .. } => "PONG",
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProtoResult<String> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> ProtoResult<Self> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}
