//! # relay-client
//!
//! Session client for the relay gateway.
//!
//! [`SessionClient`] keeps one authenticated connection alive:
//!
//! - sends made while offline wait in a FIFO queue and go out, in order, as
//!   soon as the next connection is authenticated
//! - a lost connection is retried with exponential backoff; a rejected
//!   credential is not
//! - gateway `PING`s are answered automatically
//!
//! State changes are published on a `watch` channel and everything else on a
//! `broadcast` channel of [`ClientEvent`]s.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod events;
pub mod queue;
pub mod reconnect;
pub mod state;

pub use client::{ClientConfig, Delivery, SessionClient};
pub use error::{ClientError, ClientResult};
pub use events::ClientEvent;
pub use queue::OutboundQueue;
pub use reconnect::{DEFAULT_MAX_ATTEMPTS, ReconnectConfig};
pub use state::ClientState;
