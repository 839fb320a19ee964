//! # relay-ratelimit
//!
//! Per-identity message budgets for the relay session gateway.
//!
//! Each identity key owns one fixed window shared by all of its connections.
//! A window admits `limit` messages, then denies until its reset time passes,
//! at which point the next message starts a fresh window. Bursts straddling a
//! window boundary can therefore reach twice the limit in a short span.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod limiter;

pub use config::{RateLimitConfig, DEFAULT_LIMIT, DEFAULT_WINDOW};
pub use error::{RateLimitError, RateLimitResult};
pub use limiter::{FixedWindowLimiter, RateLimitDecision, RateLimitStore, RateLimitWindow};
