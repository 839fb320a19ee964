//! Application handler for routed chat messages.

use std::future::Future;

use relay_auth::Identity;
use relay_proto::CharacterChat;

/// What a handler wants sent back to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    /// Response text.
    pub response: String,
    /// Change in the character's disposition.
    pub emotional_shift: Option<f32>,
    /// Action the character takes.
    pub action: Option<String>,
}

impl HandlerResponse {
    /// Creates a plain text response.
    #[must_use]
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            emotional_shift: None,
            action: None,
        }
    }

    /// Sets the emotional shift.
    #[must_use]
    pub const fn with_emotional_shift(mut self, shift: f32) -> Self {
        self.emotional_shift = Some(shift);
        self
    }

    /// Sets the action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Produces responses to accepted chat messages.
///
/// Invoked on its own task after the acknowledgment has been queued, so a slow
/// handler never blocks the connection's read loop. Returning `None` sends
/// nothing.
#[allow(async_fn_in_trait)]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one chat message from `identity`.
    fn handle(
        &self,
        identity: &Identity,
        chat: &CharacterChat,
    ) -> impl Future<Output = Option<HandlerResponse>> + Send;
}

/// Replies with `Echo: <message>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    async fn handle(&self, _identity: &Identity, chat: &CharacterChat) -> Option<HandlerResponse> {
        Some(HandlerResponse::text(format!("Echo: {}", chat.message)))
    }
}
