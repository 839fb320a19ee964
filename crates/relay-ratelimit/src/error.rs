//! Error types for rate limiting.

use thiserror::Error;

/// Errors that can occur in the rate limiter.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Invalid limiter configuration.
    #[error("invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for rate limit operations.
pub type RateLimitResult<T> = Result<T, RateLimitError>;
