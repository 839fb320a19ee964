//! Connection manager: authentication, the live connection set and teardown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use relay_auth::{AuthResult, Identity, JwtManager};
use relay_proto::ServerEvent;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::connection::{
    Connection, ConnectionHandle, ConnectionId, ConnectionState, DisconnectReason, OutboundSender,
};
use crate::error::{ServerError, ServerResult};
use crate::heartbeat::HeartbeatHandle;

#[derive(Debug)]
struct LiveConnection {
    handle: Arc<ConnectionHandle>,
    heartbeat: HeartbeatHandle,
}

/// Owns every open connection and is the only place connections are opened or torn down.
#[derive(Debug)]
pub struct ConnectionManager {
    jwt: JwtManager,
    heartbeat: HeartbeatConfig,
    connections: RwLock<HashMap<ConnectionId, LiveConnection>>,
}

impl ConnectionManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(jwt: JwtManager, heartbeat: HeartbeatConfig) -> Self {
        Self {
            jwt,
            heartbeat,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Verifies a handshake credential.
    ///
    /// # Errors
    ///
    /// `AuthenticationRequired` if `credential` is absent, `AuthenticationFailed`
    /// if it does not verify.
    pub fn authenticate(&self, credential: Option<&str>) -> AuthResult<Identity> {
        self.jwt.authenticate(credential)
    }

    /// Opens an authenticated connection.
    ///
    /// Queues `AUTH_SUCCESS` as the first outbound event, attaches a heartbeat
    /// monitor and adds the connection to the live set.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound queue cannot take the greeting.
    pub fn open(
        self: &Arc<Self>,
        identity: Identity,
        peer: Option<SocketAddr>,
        outbound: OutboundSender,
    ) -> ServerResult<Arc<ConnectionHandle>> {
        let id = ConnectionId::new();
        let mut connection = Connection::new(id);
        connection.transition(ConnectionState::Authenticating)?;
        connection.authenticate(identity.clone())?;

        let handle = Arc::new(ConnectionHandle::new(connection, identity, peer, outbound));
        handle.try_send(ServerEvent::auth_success(&handle.identity().user_id))?;

        let manager: Weak<Self> = Arc::downgrade(self);
        let heartbeat = HeartbeatHandle::spawn(self.heartbeat, id, handle.outbound(), move || {
            if let Some(manager) = manager.upgrade() {
                manager.close(id, DisconnectReason::HeartbeatTimeout);
            }
        });

        self.connections.write().insert(
            id,
            LiveConnection {
                handle: handle.clone(),
                heartbeat,
            },
        );

        info!(
            connection_id = %id,
            user_id = %handle.identity().user_id,
            peer = ?peer,
            "connection opened"
        );
        Ok(handle)
    }

    /// Tears a connection down.
    ///
    /// Only the first call for a given id does anything: it removes the
    /// connection from the live set, stops its heartbeat, moves it to `Closed`
    /// and cancels its shutdown token. Later or concurrent calls return false.
    pub fn close(&self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let Some(live) = self.connections.write().remove(&id) else {
            debug!(connection_id = %id, reason = %reason, "close ignored, not live");
            return false;
        };

        live.heartbeat.stop();
        live.handle.mark_closed();

        match reason {
            DisconnectReason::HeartbeatTimeout | DisconnectReason::PolicyViolation => warn!(
                connection_id = %id,
                user_id = %live.handle.identity().user_id,
                reason = %reason,
                "connection closed"
            ),
            _ => info!(
                connection_id = %id,
                user_id = %live.handle.identity().user_id,
                reason = %reason,
                "connection closed"
            ),
        }
        true
    }

    /// Tears down every live connection.
    pub fn close_all(&self, reason: DisconnectReason) -> usize {
        let ids: Vec<ConnectionId> = self.connections.read().keys().copied().collect();
        ids.into_iter().filter(|id| self.close(*id, reason)).count()
    }

    /// Forwards client liveness to the connection's heartbeat and activity clock.
    pub fn record_liveness(&self, id: ConnectionId) {
        if let Some(live) = self.connections.read().get(&id) {
            live.handle.touch();
            live.heartbeat.on_pong();
        }
    }

    /// Looks up a live connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().get(&id).map(|live| live.handle.clone())
    }

    /// Check if a connection is live.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Live connections belonging to one user.
    #[must_use]
    pub fn connections_for(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .values()
            .filter(|live| live.handle.identity().user_id == user_id)
            .map(|live| live.handle.clone())
            .collect()
    }

    /// Queues an event for one connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not live or its queue is closed.
    pub async fn send_to(&self, id: ConnectionId, event: ServerEvent) -> ServerResult<()> {
        let handle = self.get(id).ok_or(ServerError::ConnectionNotFound(id))?;
        handle.send(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use relay_auth::{JwtConfig, SessionClaims};

    use crate::connection::outbound_channel;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn jwt() -> JwtManager {
        JwtManager::new(JwtConfig::new_hs256(SECRET).unwrap())
    }

    fn manager(heartbeat: HeartbeatConfig) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(jwt(), heartbeat))
    }

    fn slow_heartbeat() -> HeartbeatConfig {
        HeartbeatConfig::new().with_ping_interval(Duration::from_secs(3600))
    }

    // ==================== Authenticate Tests ====================

    #[test]
    fn test_authenticate_valid() {
        let mgr = ConnectionManager::new(jwt(), HeartbeatConfig::new());
        let token = jwt()
            .issue(&SessionClaims::new("user-123").with_tier("starter"))
            .unwrap();
        let identity = mgr.authenticate(Some(&token)).unwrap();
        assert_eq!(identity.user_id, "user-123");
        assert_eq!(identity.tier.as_deref(), Some("starter"));
    }

    #[test]
    fn test_authenticate_rejections() {
        let mgr = ConnectionManager::new(jwt(), HeartbeatConfig::new());
        assert_eq!(
            mgr.authenticate(None).unwrap_err().rejection_reason(),
            "Authentication required"
        );
        assert_eq!(
            mgr.authenticate(Some("x.y.z")).unwrap_err().rejection_reason(),
            "Authentication failed"
        );
    }

    // ==================== Open Tests ====================

    #[tokio::test]
    async fn test_open_sends_auth_success_first() {
        let mgr = manager(slow_heartbeat());
        let (tx, mut rx) = outbound_channel(8);
        let handle = mgr.open(Identity::new("user-123"), None, tx).unwrap();

        assert!(handle.is_open());
        assert!(mgr.contains(handle.id()));
        assert_eq!(mgr.connection_count(), 1);
        match rx.recv().await {
            Some(ServerEvent::AuthSuccess { user_id, connected }) => {
                assert_eq!(user_id, "user-123");
                assert!(connected);
            }
            other => panic!("expected AUTH_SUCCESS, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connections_for_user() {
        let mgr = manager(slow_heartbeat());
        let (tx1, _rx1) = outbound_channel(8);
        let (tx2, _rx2) = outbound_channel(8);
        let (tx3, _rx3) = outbound_channel(8);
        mgr.open(Identity::new("alice"), None, tx1).unwrap();
        mgr.open(Identity::new("alice"), None, tx2).unwrap();
        mgr.open(Identity::new("bob"), None, tx3).unwrap();

        assert_eq!(mgr.connections_for("alice").len(), 2);
        assert_eq!(mgr.connections_for("bob").len(), 1);
        assert!(mgr.connections_for("carol").is_empty());
    }

    // ==================== Close Tests ====================

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mgr = manager(slow_heartbeat());
        let (tx, _rx) = outbound_channel(8);
        let handle = mgr.open(Identity::new("user-1"), None, tx).unwrap();
        let id = handle.id();
        let token = handle.shutdown_token();

        assert!(mgr.close(id, DisconnectReason::ClientClosed));
        assert!(!mgr.close(id, DisconnectReason::TransportError));
        assert!(!mgr.close(id, DisconnectReason::HeartbeatTimeout));

        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(token.is_cancelled());
        assert!(!mgr.contains(id));
        assert_eq!(mgr.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_close_single_winner() {
        let mgr = manager(slow_heartbeat());
        let (tx, _rx) = outbound_channel(8);
        let id = mgr.open(Identity::new("user-1"), None, tx).unwrap().id();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let mgr = mgr.clone();
                let reason = if i % 2 == 0 {
                    DisconnectReason::HeartbeatTimeout
                } else {
                    DisconnectReason::TransportError
                };
                tokio::spawn(async move { mgr.close(id, reason) })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_close_unknown_connection() {
        let mgr = manager(slow_heartbeat());
        assert!(!mgr.close(ConnectionId::new(), DisconnectReason::ClientClosed));
    }

    #[tokio::test]
    async fn test_close_all() {
        let mgr = manager(slow_heartbeat());
        let (tx1, _rx1) = outbound_channel(8);
        let (tx2, _rx2) = outbound_channel(8);
        let a = mgr.open(Identity::new("a"), None, tx1).unwrap();
        let b = mgr.open(Identity::new("b"), None, tx2).unwrap();

        assert_eq!(mgr.close_all(DisconnectReason::ServerShutdown), 2);
        assert_eq!(mgr.connection_count(), 0);
        assert!(!a.is_open());
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn test_send_to_closed_connection_fails() {
        let mgr = manager(slow_heartbeat());
        let (tx, _rx) = outbound_channel(8);
        let id = mgr.open(Identity::new("a"), None, tx).unwrap().id();
        mgr.close(id, DisconnectReason::ClientClosed);

        assert!(matches!(
            mgr.send_to(id, ServerEvent::ping()).await,
            Err(ServerError::ConnectionNotFound(_))
        ));
    }

    // ==================== Heartbeat Integration Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_evicts() {
        let mgr = manager(HeartbeatConfig::new());
        let (tx, mut rx) = outbound_channel(8);
        let handle = mgr.open(Identity::new("silent"), None, tx).unwrap();
        let token = handle.shutdown_token();

        assert!(matches!(rx.recv().await, Some(ServerEvent::AuthSuccess { .. })));
        assert!(matches!(rx.recv().await, Some(ServerEvent::Ping { .. })));

        token.cancelled().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert_eq!(mgr.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reader_is_evicted() {
        let mgr = manager(HeartbeatConfig::new());
        // The greeting fills the queue and nobody drains it.
        let (tx, _rx) = outbound_channel(1);
        let handle = mgr.open(Identity::new("stalled"), None, tx).unwrap();

        let blocked_send = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send(ServerEvent::pong()).await }
        });

        handle.shutdown_token().cancelled().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert_eq!(mgr.connection_count(), 0);
        assert!(matches!(
            blocked_send.await.unwrap(),
            Err(ServerError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_prevents_eviction() {
        let mgr = manager(HeartbeatConfig::new());
        let (tx, mut rx) = outbound_channel(8);
        let handle = mgr.open(Identity::new("chatty"), None, tx).unwrap();
        let id = handle.id();

        assert!(matches!(rx.recv().await, Some(ServerEvent::AuthSuccess { .. })));
        for _ in 0..3 {
            assert!(matches!(rx.recv().await, Some(ServerEvent::Ping { .. })));
            tokio::time::sleep(Duration::from_secs(1)).await;
            mgr.record_liveness(id);
        }
        assert!(handle.is_open());
        assert!(mgr.close(id, DisconnectReason::ClientClosed));
    }
}
