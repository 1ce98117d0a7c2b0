//! Bounded exponential backoff for channel reconnects.

use std::time::Duration;

use crate::state::SyncConfig;

/// Delay schedule `base, 2*base, 4*base, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    /// 0 = unlimited.
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_delay_ms),
            Duration::from_millis(config.reconnect_max_delay_ms),
            config.reconnect_max_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempt >= self.max_attempts {
            return None;
        }
        let exponent = self.attempt.min(31);
        self.attempt += 1;
        let delay = self.base.saturating_mul(1u32 << exponent);
        Some(delay.min(self.max))
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Called after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
