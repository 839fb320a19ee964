//! Reconnection policy and exponential backoff.

use std::time::Duration;

/// Default number of reconnect attempts after a lost connection.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Attempts allowed per lost connection (None = retry forever).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl ReconnectConfig {
    /// A policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the given 1-based attempt.
    ///
    /// Never decreases as `attempt` grows.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0).powi(attempt.saturating_sub(1).min(64) as i32);
        let delay_millis = self.initial_delay.as_millis() as f64 * multiplier;
        let max_millis = self.max_delay.as_millis() as f64;
        if delay_millis >= max_millis {
            self.max_delay
        } else {
            Duration::from_millis(delay_millis as u64)
        }
    }

    /// Whether the given 1-based attempt is allowed.
    #[must_use]
    pub const fn should_reconnect(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, Some(5));
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = ReconnectConfig::default().with_max_attempts(None);

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(16));
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(32));
        assert_eq!(config.delay_for_attempt(7), Duration::from_secs(60)); // capped
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_with_zero_attempt() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
    }

    #[test]
    fn test_should_reconnect_limited() {
        let config = ReconnectConfig::default().with_max_attempts(Some(5));

        assert!(config.should_reconnect(1));
        assert!(config.should_reconnect(5));
        assert!(!config.should_reconnect(6));
    }

    #[test]
    fn test_should_reconnect_infinite() {
        let config = ReconnectConfig::default().with_max_attempts(None);
        assert!(config.should_reconnect(1));
        assert!(config.should_reconnect(1000));
    }

    #[test]
    fn test_disabled_never_reconnects() {
        assert!(!ReconnectConfig::disabled().should_reconnect(1));
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_capped(
            initial_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..100,
        ) {
            let config = ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                backoff_multiplier: multiplier,
                max_attempts: None,
            };
            let current = config.delay_for_attempt(attempt);
            let next = config.delay_for_attempt(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(current <= config.max_delay);
        }
    }
}
