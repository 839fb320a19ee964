//! Command-line and environment configuration for the gateway binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use relay_auth::{AuthResult, JwtConfig, JwtManager, SessionClaims};
use relay_ratelimit::RateLimitConfig;

use crate::config::{DEFAULT_PORT, HeartbeatConfig, ServerConfig, WebSocketConfig};

/// Relay session gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "RELAY_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the gateway.
    Serve(ServeArgs),

    /// Mint a session token for local testing.
    Token(TokenArgs),
}

/// Arguments for the serve command.
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "RELAY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// HS256 secret used to verify session tokens.
    #[arg(long, env = "RELAY_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Required `iss` claim, if any.
    #[arg(long, env = "RELAY_JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Messages allowed per identity per window.
    #[arg(long, env = "RELAY_RATE_LIMIT", default_value_t = 100)]
    pub rate_limit: u32,

    /// Rate limit window length in seconds.
    #[arg(long, env = "RELAY_RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window_secs: u64,

    /// Seconds between heartbeat pings.
    #[arg(long, env = "RELAY_PING_INTERVAL_SECS", default_value_t = 30)]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before evicting.
    #[arg(long, env = "RELAY_PONG_TIMEOUT_SECS", default_value_t = 10)]
    pub pong_timeout_secs: u64,

    /// Maximum concurrent connections.
    #[arg(long, env = "RELAY_MAX_CONNECTIONS", default_value_t = 1000)]
    pub max_connections: usize,

    /// Largest accepted client message in bytes.
    #[arg(long, env = "RELAY_MAX_MESSAGE_SIZE", default_value_t = crate::config::DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
}

impl ServeArgs {
    /// Socket address to bind.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Builds the server configuration.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind_addr())
            .with_max_connections(self.max_connections)
            .with_rate_limit(RateLimitConfig::new(
                self.rate_limit,
                Duration::from_secs(self.rate_window_secs),
            ))
            .with_heartbeat(
                HeartbeatConfig::new()
                    .with_ping_interval(Duration::from_secs(self.ping_interval_secs))
                    .with_pong_timeout(Duration::from_secs(self.pong_timeout_secs)),
            )
            .with_websocket_config(WebSocketConfig::new().with_max_message_size(self.max_message_size))
    }

    /// Builds the token verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is too short.
    pub fn jwt_manager(&self) -> AuthResult<JwtManager> {
        jwt_manager(&self.jwt_secret, self.jwt_issuer.as_deref())
    }
}

/// Arguments for the token command.
#[derive(Parser, Debug, Clone)]
pub struct TokenArgs {
    /// Account id to put in the token.
    pub user_id: String,

    /// HS256 signing secret.
    #[arg(long, env = "RELAY_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// `iss` claim to set.
    #[arg(long, env = "RELAY_JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Token lifetime in seconds.
    #[arg(long, default_value_t = 3600)]
    pub expires_in_secs: i64,

    /// Subscription tier claim.
    #[arg(long)]
    pub tier: Option<String>,

    /// Platform account id claim.
    #[arg(long)]
    pub external_id: Option<String>,
}

impl TokenArgs {
    /// Signs a token for the requested claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is too short or signing fails.
    pub fn mint(&self) -> AuthResult<String> {
        let mut claims = SessionClaims::new(&self.user_id)
            .with_expiry_duration(chrono::Duration::seconds(self.expires_in_secs));
        if let Some(tier) = &self.tier {
            claims = claims.with_tier(tier);
        }
        if let Some(id) = &self.external_id {
            claims = claims.with_external_id(id);
        }
        jwt_manager(&self.jwt_secret, self.jwt_issuer.as_deref())?.issue(&claims)
    }
}

fn jwt_manager(secret: &str, issuer: Option<&str>) -> AuthResult<JwtManager> {
    let mut config = JwtConfig::new_hs256(secret)?;
    if let Some(issuer) = issuer {
        config = config.with_issuer(issuer);
    }
    Ok(JwtManager::new(config))
}
