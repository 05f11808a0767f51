//! Reconnect backoff schedule.
//!
//! Delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped, then jittered
//! by a uniform factor in `[0.75, 1.25)` and capped again.

use rand::Rng;
use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default ceiling for any single retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);

const JITTER_MIN: f64 = 0.75;
const JITTER_MAX: f64 = 1.25;

/// Attempt counter plus the delay schedule derived from it.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Number of retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Advance the attempt counter and return the jittered delay for it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let factor = rand::rng().random_range(JITTER_MIN..JITTER_MAX);
        self.jittered(self.attempt, factor)
    }

    /// Un-jittered delay for a 1-based attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(1u64 << exponent).min(max_ms))
    }

    /// Delay for `attempt` scaled by `factor`, truncated to whole milliseconds
    /// and never above the cap.
    pub fn jittered(&self, attempt: u32, factor: f64) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let ms = (base_ms * factor).max(0.0) as u64;
        Duration::from_millis(ms).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
