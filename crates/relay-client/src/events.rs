//! Session client event types.

use std::time::Duration;

use relay_proto::{Acknowledgment, CharacterResponse, ErrorEvent};

/// Events published by a [`crate::SessionClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Authenticated with the gateway.
    Connected {
        /// User id confirmed by the gateway.
        user_id: String,
    },
    /// An established connection was lost.
    Disconnected {
        /// What ended it.
        reason: String,
    },
    /// Waiting before the next reconnect attempt.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Reconnection gave up.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        last_error: String,
    },
    /// A connection attempt failed and will not be retried.
    Error(String),
    /// Acknowledgment for a sent message.
    Ack(Acknowledgment),
    /// Character response from the gateway.
    Response(CharacterResponse),
    /// `ERROR` event from the gateway.
    ServerError(ErrorEvent),
}
