//! Fixed-window limiter keyed by identity.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::{RateLimitError, RateLimitResult};

/// Counting state for one identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// Messages admitted in this window.
    pub count: u32,
    /// When the window started.
    pub window_start: DateTime<Utc>,
    /// When the window ends.
    pub reset_time: DateTime<Utc>,
}

impl RateLimitWindow {
    fn start(now: DateTime<Utc>, length: TimeDelta) -> Self {
        Self {
            count: 1,
            window_start: now,
            reset_time: now + length,
        }
    }

    /// A window is replaced only once the current time is strictly past its reset time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.reset_time
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the message may proceed.
    pub allowed: bool,
    /// Messages left in the window after this one.
    pub remaining: u32,
    /// When the window ends.
    pub reset_time: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds from `now` until the window resets, rounded up.
    #[must_use]
    pub fn retry_after_secs_at(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }

    /// Whole seconds until the window resets, rounded up.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs_at(Utc::now())
    }
}

/// Storage contract for per-identity message budgets.
///
/// The in-process [`FixedWindowLimiter`] is the default; a shared external
/// store can implement the same contract.
pub trait RateLimitStore: Send + Sync {
    /// Counts one message against `key` and reports whether it is allowed.
    fn check(&self, key: &str) -> RateLimitDecision;

    /// Reports what [`Self::check`] would decide, without counting anything.
    fn peek(&self, key: &str) -> RateLimitDecision;
}

/// In-memory fixed-window limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: TimeDelta,
    enabled: bool,
    windows: RwLock<HashMap<String, RateLimitWindow>>,
}

impl FixedWindowLimiter {
    /// Creates a limiter from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn from_config(config: &RateLimitConfig) -> RateLimitResult<Self> {
        config.validate()?;
        let window = TimeDelta::from_std(config.window)
            .map_err(|e| RateLimitError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            limit: config.limit,
            window,
            enabled: config.enabled,
            windows: RwLock::new(HashMap::new()),
        })
    }

    /// Counts one message against `key` at an explicit instant.
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        if !self.enabled {
            return self.unlimited(now);
        }

        let mut windows = self.windows.write();
        let decision = match windows.get_mut(key) {
            Some(window) if !window.is_expired(now) => {
                if window.count < self.limit {
                    window.count += 1;
                    RateLimitDecision {
                        allowed: true,
                        remaining: self.limit - window.count,
                        reset_time: window.reset_time,
                    }
                } else {
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_time: window.reset_time,
                    }
                }
            }
            _ => {
                let window = RateLimitWindow::start(now, self.window);
                windows.insert(key.to_string(), window);
                RateLimitDecision {
                    allowed: true,
                    remaining: self.limit - 1,
                    reset_time: window.reset_time,
                }
            }
        };

        if !decision.allowed {
            debug!(key = %key, reset_time = %decision.reset_time, "rate limit exceeded");
        }
        decision
    }

    /// Reports what [`Self::check_at`] would decide without counting.
    pub fn peek_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        if !self.enabled {
            return self.unlimited(now);
        }

        match self.windows.read().get(key) {
            Some(window) if !window.is_expired(now) => {
                let allowed = window.count < self.limit;
                RateLimitDecision {
                    allowed,
                    remaining: if allowed { self.limit - window.count - 1 } else { 0 },
                    reset_time: window.reset_time,
                }
            }
            _ => RateLimitDecision {
                allowed: true,
                remaining: self.limit - 1,
                reset_time: now + self.window,
            },
        }
    }

    /// Drops windows that have expired as of `now`, returning how many were removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, window| !window.is_expired(now));
        before - windows.len()
    }

    /// Returns the current window for a key.
    #[must_use]
    pub fn window(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows.read().get(key).copied()
    }

    /// Get number of tracked keys.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.windows.read().len()
    }

    /// Messages allowed per window.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Check if rate limiting is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn unlimited(&self, now: DateTime<Utc>) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: self.limit,
            reset_time: now + self.window,
        }
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self {
            limit: crate::config::DEFAULT_LIMIT,
            window: TimeDelta::seconds(60),
            enabled: true,
            windows: RwLock::new(HashMap::new()),
        }
    }
}

impl RateLimitStore for FixedWindowLimiter {
    fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now())
    }

    fn peek(&self, key: &str) -> RateLimitDecision {
        self.peek_at(key, Utc::now())
    }
}
