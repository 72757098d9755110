//! Reconnect backoff policy
//!
//! `delay = min(base * 2^attempt, max_delay)`, with a hard ceiling on the
//! number of automatic attempts.

use serde::Deserialize;
use std::time::Duration;

/// Default delay before the first retry
pub const DEFAULT_BASE_MS: u64 = 1_000;
/// Upper bound for any single retry delay
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Automatic retries before the link waits for an explicit `connect()`
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub const fn new(base_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    /// Delay for a given attempt number, ignoring the ceiling
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_delay_ms))
    }

    /// Delay for the next retry, or `None` once the ceiling is reached
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(self.delay(attempt))
        }
    }

    /// Full sequence of automatic retry delays
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |attempt| self.delay(attempt))
    }
}
