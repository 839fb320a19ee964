//! Gateway server: accept loop, authenticated upgrade and housekeeping.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use relay_auth::{Identity, JwtManager, extract_credential};
use relay_ratelimit::FixedWindowLimiter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{DisconnectReason, outbound_channel};
use crate::error::{ServerError, ServerResult};
use crate::handler::{EchoHandler, MessageHandler};
use crate::manager::ConnectionManager;
use crate::router::MessageRouter;
use crate::session::run_session;

/// The gateway server.
///
/// Cheap to clone; clones share the same connection set, limiter and shutdown
/// signal.
pub struct GatewayServer<H = EchoHandler> {
    config: Arc<ServerConfig>,
    manager: Arc<ConnectionManager>,
    limiter: Arc<FixedWindowLimiter>,
    router: Arc<MessageRouter<H>>,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl<H> Clone for GatewayServer<H> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            manager: self.manager.clone(),
            limiter: self.limiter.clone(),
            router: self.router.clone(),
            slots: self.slots.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H> std::fmt::Debug for GatewayServer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("config", &self.config)
            .field("connections", &self.manager.connection_count())
            .finish_non_exhaustive()
    }
}

impl<H: MessageHandler> GatewayServer<H> {
    /// Create a new gateway server.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the rate limit configuration is invalid.
    pub fn new(config: ServerConfig, jwt: JwtManager, handler: H) -> ServerResult<Self> {
        let limiter = Arc::new(FixedWindowLimiter::from_config(&config.rate_limit)?);
        let manager = Arc::new(ConnectionManager::new(jwt, config.heartbeat));
        let router = Arc::new(MessageRouter::new(limiter.clone(), Arc::new(handler)));
        let slots = Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS)));
        Ok(Self {
            config: Arc::new(config),
            manager,
            limiter,
            router,
            slots,
            shutdown: CancellationToken::new(),
        })
    }

    /// Claims one of the `max_connections` slots. The slot is held from the
    /// handshake until the session ends, so concurrent handshakes cannot
    /// overshoot the limit.
    fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the connection manager.
    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    /// Get the shared rate limiter.
    pub fn limiter(&self) -> Arc<FixedWindowLimiter> {
        self.limiter.clone()
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindFailed` if the address cannot be bound.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))
    }

    /// Bind and serve until [`Self::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn run(&self) -> ServerResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    ///
    /// # Errors
    ///
    /// Currently infallible once the listener is bound.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Gateway server listening");
        }

        let housekeeping = tokio::spawn(prune_rate_limits(
            self.limiter.clone(),
            self.config.rate_limit.window,
            self.shutdown.clone(),
        ));

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer_addr).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                () = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let closed = self.manager.close_all(DisconnectReason::ServerShutdown);
        housekeeping.abort();
        info!(closed, "Gateway server shut down");
        Ok(())
    }

    /// Stop accepting connections and close every open one.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Check whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        debug!(peer = %peer_addr, "New connection");

        let mut identity: Option<Identity> = None;
        let manager = &self.manager;
        let max_connections = self.config.max_connections;
        let slot = self.reserve_slot();
        let at_capacity = slot.is_none();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if at_capacity {
                warn!(
                    peer = %peer_addr,
                    current = manager.connection_count(),
                    max = max_connections,
                    "Connection rejected: max connections reached"
                );
                return Err(reject(StatusCode::SERVICE_UNAVAILABLE, "Server at capacity"));
            }

            let authorization = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok());
            let credential = extract_credential(authorization, request.uri().query());
            match manager.authenticate(credential) {
                Ok(verified) => {
                    identity = Some(verified);
                    Ok(response)
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "Handshake authentication rejected");
                    Err(reject(StatusCode::UNAUTHORIZED, e.rejection_reason()))
                }
            }
        };

        let handshake = accept_hdr_async_with_config(
            stream,
            callback,
            Some(self.config.websocket.transport_config()),
        );
        let ws_stream = match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                return;
            }
            Err(_) => {
                warn!(peer = %peer_addr, "WebSocket handshake timed out");
                return;
            }
        };

        let Some(identity) = identity else {
            warn!(peer = %peer_addr, "Handshake completed without an identity");
            return;
        };

        let (outbound_tx, outbound_rx) = outbound_channel(self.config.outbound_buffer);
        let connection = match self.manager.open(identity, Some(peer_addr), outbound_tx) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Failed to open connection");
                return;
            }
        };

        let reason = run_session(
            ws_stream,
            connection,
            self.manager.clone(),
            self.router.clone(),
            self.config.websocket,
            outbound_rx,
        )
        .await;
        drop(slot);
        debug!(peer = %peer_addr, reason = %reason, "Connection finished");
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn prune_rate_limits(
    limiter: Arc<FixedWindowLimiter>,
    window: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(window);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let pruned = limiter.prune_expired(Utc::now());
                if pruned > 0 {
                    debug!(pruned, "Pruned expired rate limit windows");
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use relay_auth::JwtConfig;
    use relay_ratelimit::RateLimitConfig;

    const SECRET: &str = "server-test-secret-with-enough-bytes!";

    fn make_config() -> ServerConfig {
        ServerConfig::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }

    fn jwt() -> JwtManager {
        JwtManager::new(JwtConfig::new_hs256(SECRET).unwrap())
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_gateway_server_new() {
        let server = GatewayServer::new(make_config(), jwt(), EchoHandler).unwrap();
        assert_eq!(server.manager().connection_count(), 0);
        assert_eq!(server.limiter().limit(), 100);
        assert!(!server.is_shutting_down());
    }

    #[test]
    fn test_invalid_rate_limit_rejected() {
        let config = make_config().with_rate_limit(RateLimitConfig::new(0, Duration::from_secs(60)));
        let result = GatewayServer::new(config, jwt(), EchoHandler);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_reject_response() {
        let response = reject(StatusCode::UNAUTHORIZED, "Authentication required");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.body().as_deref(), Some("Authentication required"));
    }

    // ==================== Capacity Tests ====================

    #[test]
    fn test_slots_cap_concurrent_reservations() {
        let server = GatewayServer::new(make_config().with_max_connections(2), jwt(), EchoHandler).unwrap();
        let first = server.reserve_slot();
        let second = server.reserve_slot();
        assert!(first.is_some());
        assert!(second.is_some());
        // No connection is open yet; reservations alone fill capacity.
        assert_eq!(server.manager().connection_count(), 0);
        assert!(server.reserve_slot().is_none());

        drop(first);
        assert!(server.reserve_slot().is_some());
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let server = GatewayServer::new(make_config().with_max_connections(0), jwt(), EchoHandler).unwrap();
        assert!(server.reserve_slot().is_none());
    }

    // ==================== Lifecycle Tests ====================

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = GatewayServer::new(make_config(), jwt(), EchoHandler).unwrap();
        let listener = server.bind().await.unwrap();
        let running = server.clone();
        let task = tokio::spawn(async move { running.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(server.is_shutting_down());
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let server = GatewayServer::new(ServerConfig::new(addr), jwt(), EchoHandler).unwrap();
        assert!(matches!(server.bind().await, Err(ServerError::BindFailed(a, _)) if a == addr));
    }
}
