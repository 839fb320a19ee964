//! # relay-proto
//!
//! Wire protocol for the relay session gateway.
//!
//! Every frame is a JSON text message tagged by a `type` field:
//!
//! - [`MessageEnvelope`]: what a client sends, before validation
//! - [`InboundMessage`]: the closed set of client message kinds an envelope
//!   resolves to
//! - [`ServerEvent`]: everything the gateway pushes back, including
//!   [`Acknowledgment`]s

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod events;

pub use envelope::{CharacterChat, InboundMessage, MessageEnvelope, MessageKind};
pub use error::{ProtoError, ProtoResult};
pub use events::{
    Acknowledgment, CharacterResponse, ErrorCode, ErrorEvent, RateLimitInfo, ServerEvent,
};
