//! # relay-server
//!
//! Real-time session gateway for game clients.
//!
//! Clients open a WebSocket carrying a bearer JWT. Once the upgrade is
//! authenticated the gateway:
//!
//! - greets the client with `AUTH_SUCCESS`
//! - validates each message and rate-limits it per identity
//! - acknowledges accepted messages and hands them to a [`MessageHandler`]
//! - pings the client and evicts it when a pong does not arrive in time
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_auth::{JwtConfig, JwtManager};
//! use relay_server::{EchoHandler, GatewayServer, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let jwt = JwtManager::new(JwtConfig::new_hs256("a-secret-of-at-least-thirty-two-bytes")?);
//! let server = GatewayServer::new(ServerConfig::default(), jwt, EchoHandler)?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod manager;
pub mod router;
pub mod server;
pub mod session;

pub use config::{HeartbeatConfig, ServerConfig, WebSocketConfig};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionState, DisconnectReason};
pub use error::{ServerError, ServerResult};
pub use handler::{EchoHandler, HandlerResponse, MessageHandler};
pub use heartbeat::{HeartbeatHandle, HeartbeatOutcome};
pub use manager::ConnectionManager;
pub use router::{MessageRouter, RouteOutcome};
pub use server::GatewayServer;
