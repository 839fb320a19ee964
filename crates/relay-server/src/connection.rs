//! Per-connection state.
//!
//! A [`Connection`] walks `Connecting -> Authenticating -> Open -> Closing ->
//! Closed`. Only the [`crate::ConnectionManager`] drives those transitions; the
//! session loop and the router see the connection through a shared
//! [`ConnectionHandle`].

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use relay_auth::Identity;
use relay_proto::ServerEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, ServerResult};

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a server-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport accepted, nothing verified yet.
    Connecting,
    /// Credential under verification.
    Authenticating,
    /// Authenticated; application messages flow.
    Open,
    /// Teardown in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns true if moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Authenticating)
                | (Self::Authenticating, Self::Open)
                | (Self::Open, Self::Closing)
                | (
                    Self::Connecting | Self::Authenticating | Self::Open | Self::Closing,
                    Self::Closed
                )
        )
    }

    /// Check if application messages may be exchanged.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the state is terminal.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The client closed the socket.
    ClientClosed,
    /// No pong arrived within the pong timeout.
    HeartbeatTimeout,
    /// The transport failed underneath the session.
    TransportError,
    /// Too many oversized messages.
    PolicyViolation,
    /// The server is shutting down.
    ServerShutdown,
}

impl DisconnectReason {
    /// Returns a short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client closed",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::TransportError => "transport error",
            Self::PolicyViolation => "policy violation",
            Self::ServerShutdown => "server shutdown",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection record owned by the connection manager.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Option<Identity>,
    state: ConnectionState,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            identity: None,
            state: ConnectionState::Connecting,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the bound identity, once authenticated.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get when the connection was created.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Get when the last inbound traffic was seen.
    #[must_use]
    pub const fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidTransition`] if `next` is not reachable
    /// from the current state.
    pub fn transition(&mut self, next: ConnectionState) -> ServerResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ServerError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Binds the identity and opens the connection.
    ///
    /// # Errors
    ///
    /// Returns an error unless the connection is `Authenticating`.
    pub fn authenticate(&mut self, identity: Identity) -> ServerResult<()> {
        self.transition(ConnectionState::Open)?;
        self.identity = Some(identity);
        Ok(())
    }

    /// Update the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Outbound event queue feeding a connection's writer.
pub type OutboundSender = mpsc::Sender<ServerEvent>;

/// Receiving side of [`OutboundSender`].
pub type OutboundReceiver = mpsc::Receiver<ServerEvent>;

/// Create a new outbound channel pair.
#[must_use]
pub fn outbound_channel(buffer_size: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(buffer_size.max(1))
}

/// Shared view of a live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    identity: Identity,
    peer: Option<SocketAddr>,
    outbound: OutboundSender,
    connection: parking_lot::Mutex<Connection>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(
        connection: Connection,
        identity: Identity,
        peer: Option<SocketAddr>,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            identity,
            peer,
            outbound,
            connection: parking_lot::Mutex::new(connection),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.connection.lock().id()
    }

    /// Get the authenticated identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get the remote address, if known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.lock().state()
    }

    /// Check if the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Get when the last inbound traffic was seen.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.connection.lock().last_activity()
    }

    /// Records inbound traffic.
    pub fn touch(&self) {
        self.connection.lock().touch();
    }

    /// Token cancelled when the connection is torn down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Queues an event for the client.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ConnectionClosed`] if the connection is no longer
    /// open, its writer has gone away, or it is torn down while the queue is
    /// full.
    pub async fn send(&self, event: ServerEvent) -> ServerResult<()> {
        if !self.is_open() {
            return Err(ServerError::ConnectionClosed);
        }
        tokio::select! {
            sent = self.outbound.send(event) => sent.map_err(|_| ServerError::ConnectionClosed),
            () = self.shutdown.cancelled() => Err(ServerError::ConnectionClosed),
        }
    }

    /// Queues an event without waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or its queue is full.
    pub fn try_send(&self, event: ServerEvent) -> ServerResult<()> {
        if !self.is_open() {
            return Err(ServerError::ConnectionClosed);
        }
        self.outbound
            .try_send(event)
            .map_err(|e| ServerError::ChannelSend(e.to_string()))
    }

    pub(crate) fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Runs teardown on the record: `Open -> Closing -> Closed`, or straight to
    /// `Closed` from earlier states. Returns false if already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut connection = self.connection.lock();
        if connection.state().is_closed() {
            return false;
        }
        if connection.state().is_open() {
            let _ = connection.transition(ConnectionState::Closing);
        }
        let closed = connection.transition(ConnectionState::Closed).is_ok();
        drop(connection);
        self.shutdown.cancel();
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use test_case::test_case;

    fn open_connection() -> Connection {
        let mut conn = Connection::new(ConnectionId::new());
        conn.transition(ConnectionState::Authenticating).unwrap();
        conn.authenticate(Identity::new("user-1")).unwrap();
        conn
    }

    // ==================== ConnectionState Tests ====================

    #[test_case(ConnectionState::Connecting, ConnectionState::Authenticating, true ; "connecting to authenticating")]
    #[test_case(ConnectionState::Authenticating, ConnectionState::Open, true ; "authenticating to open")]
    #[test_case(ConnectionState::Open, ConnectionState::Closing, true ; "open to closing")]
    #[test_case(ConnectionState::Closing, ConnectionState::Closed, true ; "closing to closed")]
    #[test_case(ConnectionState::Connecting, ConnectionState::Closed, true ; "refused handshake")]
    #[test_case(ConnectionState::Connecting, ConnectionState::Open, false ; "skip authentication")]
    #[test_case(ConnectionState::Closed, ConnectionState::Open, false ; "reopen after close")]
    #[test_case(ConnectionState::Closed, ConnectionState::Closed, false ; "close twice")]
    #[test_case(ConnectionState::Closing, ConnectionState::Open, false ; "reopen while closing")]
    #[test_case(ConnectionState::Open, ConnectionState::Authenticating, false ; "reauthenticate")]
    fn test_transitions(from: ConnectionState, to: ConnectionState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    // ==================== Connection Tests ====================

    #[test]
    fn test_connection_new() {
        let conn = Connection::new(ConnectionId::new());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.identity().is_none());
        assert_eq!(conn.connected_at(), conn.last_activity());
    }

    #[test]
    fn test_authenticate_binds_identity() {
        let conn = open_connection();
        assert!(conn.state().is_open());
        assert_eq!(conn.identity().map(|i| i.user_id.as_str()), Some("user-1"));
    }

    #[test]
    fn test_authenticate_requires_authenticating_state() {
        let mut conn = Connection::new(ConnectionId::new());
        let err = conn.authenticate(Identity::new("u")).unwrap_err();
        assert!(matches!(
            err,
            ServerError::InvalidTransition {
                from: ConnectionState::Connecting,
                to: ConnectionState::Open
            }
        ));
        assert!(conn.identity().is_none());
    }

    #[test]
    fn test_touch_advances_activity() {
        let mut conn = open_connection();
        let before = conn.last_activity();
        std::thread::sleep(std::time::Duration::from_millis(2));
        conn.touch();
        assert!(conn.last_activity() > before);
    }

    // ==================== ConnectionHandle Tests ====================

    #[tokio::test]
    async fn test_handle_send_while_open() {
        let (tx, mut rx) = outbound_channel(4);
        let handle = ConnectionHandle::new(open_connection(), Identity::new("user-1"), None, tx);

        handle.send(ServerEvent::ping()).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ServerEvent::Ping { .. })));
    }

    #[tokio::test]
    async fn test_handle_mark_closed_once() {
        let (tx, _rx) = outbound_channel(4);
        let handle = ConnectionHandle::new(open_connection(), Identity::new("user-1"), None, tx);
        let token = handle.shutdown_token();

        assert!(handle.mark_closed());
        assert!(!handle.mark_closed());
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(token.is_cancelled());
        assert!(matches!(
            handle.send(ServerEvent::ping()).await,
            Err(ServerError::ConnectionClosed)
        ));
        assert!(handle.try_send(ServerEvent::ping()).is_err());
    }

    #[tokio::test]
    async fn test_handle_send_unblocks_on_teardown() {
        let (tx, _rx) = outbound_channel(1);
        let handle = Arc::new(ConnectionHandle::new(
            open_connection(),
            Identity::new("user-1"),
            None,
            tx,
        ));
        handle.send(ServerEvent::ping()).await.unwrap();

        let blocked = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send(ServerEvent::pong()).await }
        });
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        assert!(handle.mark_closed());
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ServerError::ConnectionClosed)));
    }

    #[test]
    fn test_disconnect_reason_labels() {
        assert_eq!(DisconnectReason::HeartbeatTimeout.to_string(), "heartbeat timeout");
        assert_eq!(DisconnectReason::ClientClosed.as_str(), "client closed");
    }
}
