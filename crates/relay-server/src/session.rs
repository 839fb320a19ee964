//! Per-connection WebSocket session loop.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use relay_proto::{ErrorEvent, InboundMessage, MessageEnvelope, ServerEvent};
use tokio::time;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::config::WebSocketConfig;
use crate::connection::{ConnectionHandle, DisconnectReason, OutboundReceiver};
use crate::error::{ServerError, ServerResult};
use crate::handler::MessageHandler;
use crate::manager::ConnectionManager;
use crate::router::MessageRouter;

/// How long teardown waits to deliver the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Tracks message size violations for a connection.
#[derive(Debug, Default)]
pub struct ViolationTracker {
    count: u32,
}

impl ViolationTracker {
    /// Create a new violation tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self { count: 0 }
    }

    /// Record a violation and return the current count.
    pub fn record_violation(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Get the current violation count.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Returns true once the count exceeds `max_violations`.
    #[must_use]
    pub const fn should_terminate(&self, max_violations: u32) -> bool {
        self.count > max_violations
    }
}

/// Get the size of a WebSocket message in bytes.
#[must_use]
pub fn ws_message_size(ws_msg: &WsMessage) -> usize {
    match ws_msg {
        WsMessage::Text(text) => text.len(),
        WsMessage::Binary(data) => data.len(),
        WsMessage::Ping(data) | WsMessage::Pong(data) => data.len(),
        WsMessage::Close(frame) => frame.as_ref().map_or(0, |f| f.reason.len() + 2),
        WsMessage::Frame(frame) => frame.len(),
    }
}

/// Check if a WebSocket message size is within the allowed limits.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` if the message exceeds the configured limit.
pub fn validate_message_size(ws_msg: &WsMessage, config: &WebSocketConfig) -> ServerResult<()> {
    let size = ws_message_size(ws_msg);
    if config.is_message_size_valid(size) {
        Ok(())
    } else {
        Err(ServerError::MessageTooLarge {
            size,
            limit: config.max_message_size,
        })
    }
}

/// A client frame after transport-level decoding.
#[derive(Debug)]
pub enum InboundFrame {
    /// A well-formed envelope.
    Envelope(MessageEnvelope),
    /// Text or binary that is not a valid envelope.
    Malformed {
        /// Why decoding failed.
        reason: String,
        /// Correlation id salvaged from the frame, if any.
        message_id: Option<String>,
    },
    /// Transport-level control traffic.
    Control,
}

/// Decode a WebSocket message into an inbound frame.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` for oversized messages and
/// `ServerError::ConnectionClosed` for a close frame.
pub fn decode_ws_message(ws_msg: &WsMessage, config: &WebSocketConfig) -> ServerResult<InboundFrame> {
    validate_message_size(ws_msg, config)?;
    let text = match ws_msg {
        WsMessage::Text(text) => text.as_str(),
        WsMessage::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => text,
            Err(e) => {
                return Ok(InboundFrame::Malformed {
                    reason: e.to_string(),
                    message_id: None,
                });
            }
        },
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
            return Ok(InboundFrame::Control);
        }
        WsMessage::Close(_) => {
            debug!("Received close frame");
            return Err(ServerError::ConnectionClosed);
        }
    };
    Ok(match MessageEnvelope::from_json(text) {
        Ok(envelope) => InboundFrame::Envelope(envelope),
        Err(e) => InboundFrame::Malformed {
            reason: e.to_string(),
            message_id: MessageEnvelope::salvage_message_id(text),
        },
    })
}

/// Serialize a server event to a WebSocket message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn event_to_ws(event: &ServerEvent) -> ServerResult<WsMessage> {
    let json = event.to_json()?;
    Ok(WsMessage::Text(json.into()))
}

/// Run the session loop for an open connection.
///
/// Reads client frames in order, forwards outbound events to the socket, and
/// ends when the client goes away, the transport fails, or the connection is
/// torn down elsewhere. Always asks the manager to close the connection on exit.
pub async fn run_session<S, H>(
    ws_stream: S,
    connection: Arc<ConnectionHandle>,
    manager: Arc<ConnectionManager>,
    router: Arc<MessageRouter<H>>,
    ws_config: WebSocketConfig,
    mut outbound_rx: OutboundReceiver,
) -> DisconnectReason
where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin + Send,
    H: MessageHandler,
{
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let connection_id = connection.id();
    let shutdown = connection.shutdown_token();

    info!(connection_id = %connection_id, "Starting session handler");

    let read_connection = connection.clone();
    let read_manager = manager.clone();
    let read_task = async move {
        let mut violations = ViolationTracker::new();

        while let Some(msg_result) = ws_stream.next().await {
            let ws_msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "WebSocket read error");
                    return DisconnectReason::TransportError;
                }
            };

            let envelope = match decode_ws_message(&ws_msg, &ws_config) {
                Ok(InboundFrame::Envelope(envelope)) => envelope,
                Ok(InboundFrame::Control) => continue,
                Ok(InboundFrame::Malformed { reason, message_id }) => {
                    debug!(connection_id = %connection_id, error = %reason, "Malformed frame");
                    read_connection.touch();
                    let outcome = router.decide_malformed(read_connection.identity(), message_id);
                    router.deliver(&read_connection, false, &outcome).await;
                    continue;
                }
                Err(ServerError::ConnectionClosed) => return DisconnectReason::ClientClosed,
                Err(ServerError::MessageTooLarge { size, limit }) => {
                    let violation_count = violations.record_violation();
                    warn!(
                        connection_id = %connection_id,
                        size = size,
                        limit = limit,
                        violations = violation_count,
                        "Received oversized message"
                    );
                    let _ = read_connection
                        .send(ServerEvent::Error(ErrorEvent::message_too_large()))
                        .await;

                    if violations.should_terminate(ws_config.max_violations) {
                        error!(
                            connection_id = %connection_id,
                            violations = violation_count,
                            "Terminating connection due to repeated size violations"
                        );
                        return DisconnectReason::PolicyViolation;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Failed to process message");
                    continue;
                }
            };

            read_connection.touch();
            match envelope.resolve() {
                Ok(InboundMessage::Pong) => read_manager.record_liveness(connection_id),
                Ok(InboundMessage::Ping) => {
                    read_manager.record_liveness(connection_id);
                    let _ = read_connection.send(ServerEvent::pong()).await;
                }
                _ => {
                    router.route(&read_connection, &envelope).await;
                }
            }
        }

        DisconnectReason::ClientClosed
    };

    let write_task = async {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(event) = msg else { break };
                    let ws_msg = match event_to_ws(&event) {
                        Ok(ws_msg) => ws_msg,
                        Err(e) => {
                            warn!(connection_id = %connection_id, error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    tokio::select! {
                        sent = ws_sink.send(ws_msg) => {
                            if let Err(e) = sent {
                                error!(connection_id = %connection_id, error = %e, "Failed to send message");
                                return DisconnectReason::TransportError;
                            }
                        }
                        () = shutdown.cancelled() => {
                            debug!(connection_id = %connection_id, "Writer stalled at teardown");
                            break;
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    let _ = time::timeout(CLOSE_GRACE, ws_sink.send(WsMessage::Close(None))).await;
                    break;
                }
            }
        }
        DisconnectReason::ServerShutdown
    };

    let reason = tokio::select! {
        reason = read_task => reason,
        reason = write_task => reason,
    };

    if manager.close(connection_id, reason) {
        debug!(connection_id = %connection_id, reason = %reason, "Session closed connection");
    }
    info!(connection_id = %connection_id, reason = %reason, "Session ended");
    reason
}
