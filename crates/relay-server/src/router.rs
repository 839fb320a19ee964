//! Message routing: rate limiting, validation, acknowledgment and dispatch.
//!
//! A rate-limited sender always sees `RATE_LIMIT_EXCEEDED`, whatever the shape
//! of its message. Otherwise a malformed message sees `INVALID_FORMAT`. Only
//! messages that pass validation are counted against the sender's budget;
//! malformed ones consult the limiter without consuming from it.

use std::sync::Arc;

use chrono::Utc;
use relay_auth::Identity;
use relay_proto::{
    Acknowledgment, CharacterChat, CharacterResponse, ErrorEvent, InboundMessage, MessageEnvelope,
    RateLimitInfo, ServerEvent,
};
use relay_ratelimit::{RateLimitDecision, RateLimitStore};
use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::handler::MessageHandler;

/// Decision for one inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Accepted: acknowledge and hand to the handler.
    Accepted {
        /// Acknowledgment for the sender.
        ack: Acknowledgment,
        /// Correlation id used for the ack and the eventual response.
        message_id: String,
        /// Validated chat body.
        chat: CharacterChat,
    },
    /// Rejected with an error; nothing is dispatched.
    Rejected(ErrorEvent),
    /// Heartbeat traffic, which does not go through the router.
    Bypass,
}

/// Routes validated messages to a [`MessageHandler`].
pub struct MessageRouter<H> {
    limiter: Arc<dyn RateLimitStore>,
    handler: Arc<H>,
}

impl<H> std::fmt::Debug for MessageRouter<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter").finish_non_exhaustive()
    }
}

impl<H: MessageHandler> MessageRouter<H> {
    /// Creates a router.
    pub fn new(limiter: Arc<dyn RateLimitStore>, handler: Arc<H>) -> Self {
        Self { limiter, handler }
    }

    /// Decides what to do with an envelope from `identity`.
    ///
    /// Counts against the identity's budget only when the envelope is valid.
    pub fn decide(&self, identity: &Identity, envelope: &MessageEnvelope) -> RouteOutcome {
        let key = identity.rate_limit_key();
        let message_id = envelope.message_id.clone();

        let chat = match envelope.validate() {
            Ok(InboundMessage::CharacterChat(chat)) => chat,
            Ok(InboundMessage::Ping | InboundMessage::Pong) => return RouteOutcome::Bypass,
            Ok(InboundMessage::Unknown(_)) => {
                return self.reject_invalid(key, message_id);
            }
            Err(e) => {
                debug!(user_id = %key, kind = %envelope.kind, error = %e, "invalid message");
                return self.reject_invalid(key, message_id);
            }
        };

        let decision = self.limiter.check(key);
        if !decision.allowed {
            return Self::rate_limited(key, &decision, message_id);
        }

        let message_id = message_id.unwrap_or_else(|| format!("msg-{}", uuid::Uuid::new_v4()));
        let ack = Acknowledgment::accepted(
            message_id.clone(),
            RateLimitInfo {
                remaining: decision.remaining,
                reset_time: decision.reset_time,
            },
        );
        RouteOutcome::Accepted {
            ack,
            message_id,
            chat,
        }
    }

    /// Decision for a frame that could not be parsed into an envelope at all.
    ///
    /// `message_id` is whatever correlation id could be salvaged from the frame.
    pub fn decide_malformed(&self, identity: &Identity, message_id: Option<String>) -> RouteOutcome {
        self.reject_invalid(identity.rate_limit_key(), message_id)
    }

    /// Routes an envelope on an open connection.
    ///
    /// Rejections go out as an ack (when requested) and as an `ERROR` event.
    /// Accepted messages are acked (when requested) and then handed to the
    /// handler on a separate task.
    pub async fn route(&self, connection: &Arc<ConnectionHandle>, envelope: &MessageEnvelope) -> RouteOutcome {
        let outcome = self.decide(connection.identity(), envelope);
        self.deliver(connection, envelope.request_ack, &outcome).await;
        outcome
    }

    /// Sends the events an outcome calls for.
    pub async fn deliver(&self, connection: &Arc<ConnectionHandle>, request_ack: bool, outcome: &RouteOutcome) {
        let connection_id = connection.id();
        match outcome {
            RouteOutcome::Rejected(error) => {
                if request_ack {
                    let _ = connection.send(ServerEvent::Ack(Acknowledgment::rejected(error))).await;
                }
                if connection.send(ServerEvent::Error(error.clone())).await.is_err() {
                    debug!(connection_id = %connection_id, "error event dropped, connection closed");
                }
            }
            RouteOutcome::Accepted {
                ack,
                message_id,
                chat,
            } => {
                if request_ack && connection.send(ServerEvent::Ack(ack.clone())).await.is_err() {
                    debug!(connection_id = %connection_id, "ack dropped, connection closed");
                    return;
                }
                self.dispatch(connection.clone(), message_id.clone(), chat.clone());
            }
            RouteOutcome::Bypass => {}
        }
    }

    fn dispatch(&self, connection: Arc<ConnectionHandle>, message_id: String, chat: CharacterChat) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let identity = connection.identity().clone();
            let Some(reply) = handler.handle(&identity, &chat).await else {
                return;
            };
            let event = ServerEvent::CharacterResponse(CharacterResponse {
                character_id: chat.character_id,
                response: reply.response,
                timestamp: Utc::now(),
                message_id: Some(message_id),
                emotional_shift: reply.emotional_shift,
                action: reply.action,
            });
            if connection.send(event).await.is_err() {
                debug!(
                    connection_id = %connection.id(),
                    "handler response dropped, connection no longer open"
                );
            }
        });
    }

    fn reject_invalid(&self, key: &str, message_id: Option<String>) -> RouteOutcome {
        let decision = self.limiter.peek(key);
        if decision.allowed {
            RouteOutcome::Rejected(ErrorEvent::invalid_format().with_message_id(message_id))
        } else {
            Self::rate_limited(key, &decision, message_id)
        }
    }

    fn rate_limited(key: &str, decision: &RateLimitDecision, message_id: Option<String>) -> RouteOutcome {
        let retry_after = decision.retry_after_secs();
        warn!(user_id = %key, retry_after, "rate limit exceeded");
        RouteOutcome::Rejected(ErrorEvent::rate_limited(retry_after).with_message_id(message_id))
    }
}
