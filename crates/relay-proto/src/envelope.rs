//! Client-to-gateway frames.
//!
//! A client frame arrives as a loosely typed [`MessageEnvelope`]. Validation
//! resolves it into the closed [`InboundMessage`] set; anything the gateway does
//! not recognize lands in [`InboundMessage::Unknown`] and is rejected by callers
//! as an invalid format.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtoError, ProtoResult};

/// Message kinds a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Chat addressed to a character.
    CharacterChat,
    /// Client-initiated liveness probe.
    Ping,
    /// Reply to a gateway `PING`.
    Pong,
}

impl MessageKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CharacterChat => "CHARACTER_CHAT",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }

    /// Looks up a kind by its wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "CHARACTER_CHAT" => Some(Self::CharacterChat),
            "PING" => Some(Self::Ping),
            "PONG" => Some(Self::Pong),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw client frame.
///
/// Type-specific fields are read from `payload` first and fall back to
/// top-level keys, so both `{"type":..,"payload":{"message":..}}` and the flat
/// `{"type":..,"message":..}` layouts are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Declared message type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific body.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Client correlation id. Numeric ids are kept as their decimal text;
    /// other non-string values are dropped.
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Client-side timestamp in whatever form the client sent, passed through
    /// untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Whether the sender expects an [`crate::Acknowledgment`].
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request_ack: bool,
    /// Any other top-level keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageEnvelope {
    /// Creates an envelope of the given type with a payload.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            message_id: None,
            timestamp: None,
            request_ack: false,
            extra: Map::new(),
        }
    }

    /// Creates a `CHARACTER_CHAT` envelope.
    #[must_use]
    pub fn character_chat(character_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            MessageKind::CharacterChat.as_str(),
            serde_json::json!({
                "characterId": character_id.into(),
                "message": message.into(),
            }),
        )
    }

    /// Creates a `PING` envelope.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(MessageKind::Ping.as_str(), Value::Null)
    }

    /// Creates a `PONG` envelope.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(MessageKind::Pong.as_str(), Value::Null)
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the client timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<Value>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Requests an acknowledgment from the gateway.
    #[must_use]
    pub const fn with_ack(mut self) -> Self {
        self.request_ack = true;
        self
    }

    /// Returns the known kind, if any.
    #[must_use]
    pub fn known_kind(&self) -> Option<MessageKind> {
        MessageKind::from_wire(&self.kind)
    }

    /// Reads a string field from the payload or the top level.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload
            .get(name)
            .or_else(|| self.extra.get(name))
            .and_then(Value::as_str)
    }

    /// Resolves the envelope into the closed message set.
    ///
    /// Unrecognized types resolve to [`InboundMessage::Unknown`] rather than an
    /// error; see [`Self::validate`] for the strict form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::MissingField`] when a known type lacks a required
    /// field or carries an empty one.
    pub fn resolve(&self) -> ProtoResult<InboundMessage> {
        let Some(kind) = self.known_kind() else {
            return Ok(InboundMessage::Unknown(self.kind.clone()));
        };
        match kind {
            MessageKind::CharacterChat => {
                let character_id = self.required("characterId")?;
                let message = self.required("message")?;
                Ok(InboundMessage::CharacterChat(CharacterChat {
                    character_id,
                    message,
                    player_context: self.field("playerContext").map(str::to_string),
                }))
            }
            MessageKind::Ping => Ok(InboundMessage::Ping),
            MessageKind::Pong => Ok(InboundMessage::Pong),
        }
    }

    /// Resolves the envelope, rejecting unknown types.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnknownType`] for types outside the catalog and
    /// [`ProtoError::MissingField`] for incomplete known types.
    pub fn validate(&self) -> ProtoResult<InboundMessage> {
        match self.resolve()? {
            InboundMessage::Unknown(kind) => Err(ProtoError::UnknownType(kind)),
            message => Ok(message),
        }
    }

    fn required(&self, name: &'static str) -> ProtoResult<String> {
        match self.field(name) {
            Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
            _ => Err(ProtoError::MissingField(name)),
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
    /// Returns an error if the text is not a JSON object with a string `type`.
    pub fn from_json(json: &str) -> ProtoResult<Self> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }

    /// Pulls the correlation id out of a frame that is not a valid envelope,
    /// so a rejection can still be matched to the message that caused it.
    #[must_use]
    pub fn salvage_message_id(json: &str) -> Option<String> {
        let value: Value = serde_json::from_str(json).ok()?;
        id_from_value(value.get("messageId")?.clone())
    }
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(id_from_value)
}

/// Validated body of a `CHARACTER_CHAT` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterChat {
    /// Target character.
    pub character_id: String,
    /// Chat text.
    pub message: String,
    /// Optional free-form context from the game client.
    pub player_context: Option<String>,
}

/// Closed set of client message kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Chat to be routed to the message handler.
    CharacterChat(CharacterChat),
    /// Client liveness probe.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Anything else; carries the declared type.
    Unknown(String),
}

impl InboundMessage {
    /// Returns true for heartbeat traffic, which bypasses routing.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}
