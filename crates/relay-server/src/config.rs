//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use relay_ratelimit::RateLimitConfig;

/// Default maximum WebSocket message size: 64KB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default maximum WebSocket frame size: 64KB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default maximum violations before connection termination.
pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;

/// Default interval between heartbeat pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default time a client has to answer a ping.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3001;

/// Configuration for WebSocket message handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Maximum allowed message size in bytes.
    /// Messages larger than this are answered with `MESSAGE_TOO_LARGE`.
    pub max_message_size: usize,
    /// Maximum allowed frame size in bytes.
    pub max_frame_size: usize,
    /// Maximum number of size violations before terminating the connection.
    /// Set to 0 to close on the first violation.
    pub max_violations: u32,
}

impl WebSocketConfig {
    /// Create a new WebSocket configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum number of violations before termination.
    #[must_use]
    pub const fn with_max_violations(mut self, max: u32) -> Self {
        self.max_violations = max;
        self
    }

    /// Check if a message size is within the allowed limit.
    #[must_use]
    pub const fn is_message_size_valid(&self, size: usize) -> bool {
        size <= self.max_message_size
    }

    /// Transport-level limits handed to tungstenite.
    ///
    /// The transport accepts frames up to four times the application limit so
    /// that moderately oversized messages reach the gateway and can be answered
    /// with an error instead of a dropped connection.
    #[must_use]
    pub fn transport_config(&self) -> tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
        let mut config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        let ceiling = self.max_message_size.saturating_mul(4);
        config.max_message_size = Some(ceiling);
        config.max_frame_size = Some(ceiling.max(self.max_frame_size));
        config
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub ping_interval: Duration,
    /// Time allowed for the matching pong.
    pub pong_timeout: Duration,
}

impl HeartbeatConfig {
    /// Create a heartbeat configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
        }
    }

    /// Set the ping interval.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the pong timeout.
    #[must_use]
    pub const fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Longest a silent client survives: one interval plus one timeout.
    #[must_use]
    pub fn eviction_after(&self) -> Duration {
        self.ping_interval + self.pong_timeout
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the WebSocket server to.
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Time allowed for the WebSocket upgrade, authentication included.
    pub handshake_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
    /// Per-identity message budget.
    pub rate_limit: RateLimitConfig,
    /// WebSocket configuration for message size limits.
    pub websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Create a new server configuration with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            handshake_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
            heartbeat: HeartbeatConfig::new(),
            rate_limit: RateLimitConfig::default(),
            websocket: WebSocketConfig::new(),
        }
    }

    /// Set the WebSocket configuration.
    #[must_use]
    pub const fn with_websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Set the heartbeat configuration.
    #[must_use]
    pub const fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the rate limit configuration.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub const fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(([0, 0, 0, 0], DEFAULT_PORT).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    // ==================== WebSocketConfig Tests ====================

    #[test]
    fn test_websocket_config_new() {
        let config = WebSocketConfig::new();

        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.max_violations, DEFAULT_MAX_VIOLATIONS);
        assert_eq!(WebSocketConfig::default(), config);
    }

    #[test]
    fn test_websocket_config_builder() {
        let config = WebSocketConfig::new()
            .with_max_message_size(1024)
            .with_max_frame_size(512)
            .with_max_violations(0);

        assert!(config.is_message_size_valid(1024));
        assert!(!config.is_message_size_valid(1025));
        assert_eq!(config.max_frame_size, 512);
        assert_eq!(config.max_violations, 0);
    }

    #[test]
    fn test_transport_config_leaves_headroom() {
        let config = WebSocketConfig::new().with_max_message_size(1000);
        let transport = config.transport_config();
        assert_eq!(transport.max_message_size, Some(4000));
        assert!(transport.max_frame_size >= Some(4000));
    }

    // ==================== HeartbeatConfig Tests ====================

    #[test]
    fn test_heartbeat_defaults() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(10));
        assert_eq!(config.eviction_after(), Duration::from_secs(40));
    }

    #[test]
    fn test_heartbeat_builder() {
        let config = HeartbeatConfig::new()
            .with_ping_interval(Duration::from_millis(100))
            .with_pong_timeout(Duration::from_millis(50));
        assert_eq!(config.eviction_after(), Duration::from_millis(150));
    }

    // ==================== ServerConfig Tests ====================

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.rate_limit.limit, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
    }

    #[test]
    fn test_server_config_builder_chain() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let config = ServerConfig::new(addr)
            .with_max_connections(5)
            .with_handshake_timeout(Duration::from_secs(2))
            .with_outbound_buffer(8)
            .with_rate_limit(RateLimitConfig::new(3, Duration::from_secs(1)))
            .with_heartbeat(HeartbeatConfig::new().with_pong_timeout(Duration::from_secs(1)));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert_eq!(config.outbound_buffer, 8);
        assert_eq!(config.rate_limit.limit, 3);
        assert_eq!(config.heartbeat.pong_timeout, Duration::from_secs(1));
    }
}
