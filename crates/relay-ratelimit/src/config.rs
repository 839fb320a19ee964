//! Rate limiter configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RateLimitError, RateLimitResult};

/// Default messages allowed per window.
pub const DEFAULT_LIMIT: u32 = 100;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the per-identity message budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Messages allowed per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
    /// Whether to enforce the limit at all.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Creates an enabled configuration.
    #[must_use]
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            enabled: true,
        }
    }

    /// Creates a configuration that allows everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Checks that the configuration can be enforced.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero limit or a zero or out-of-range window.
    pub fn validate(&self) -> RateLimitResult<()> {
        if self.limit == 0 {
            return Err(RateLimitError::InvalidConfig(
                "limit must be greater than zero".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "window must be greater than zero".to_string(),
            ));
        }
        chrono::TimeDelta::from_std(self.window)
            .map_err(|e| RateLimitError::InvalidConfig(format!("window out of range: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit, 100);
        assert_eq!(config.window, Duration::from_secs(60));
        assert!(config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled() {
        let config = RateLimitConfig::disabled();
        assert!(!config.enabled);
        assert_eq!(config.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(RateLimitConfig::new(0, DEFAULT_WINDOW).validate().is_err());
        assert!(RateLimitConfig::new(10, Duration::ZERO).validate().is_err());
        assert!(RateLimitConfig::new(10, Duration::MAX).validate().is_err());
    }
}
