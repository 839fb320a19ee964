//! Client connection state.

/// State of a [`crate::SessionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// Opening the WebSocket.
    Connecting,
    /// Upgrade accepted, waiting for `AUTH_SUCCESS`.
    Authenticating,
    /// Authenticated; sends go straight to the gateway.
    Connected,
    /// Connection lost, waiting out the backoff before the next attempt.
    Reconnecting,
    /// Gave up; a new `connect` is needed.
    Error,
}

impl ClientState {
    /// Returns true when sends are transmitted immediately.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true while a connection attempt or backoff is in progress.
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating | Self::Reconnecting)
    }

    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
