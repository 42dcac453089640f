//! Reconnect backoff.

use crate::config::{MAX_RETRY_DELAY_MS, RetryConfig};
use std::time::{Duration, Instant};

/// `min(base * 2^attempt, max)` with `max` never above 60 seconds.
///
/// ```rust
/// use iothub_device::transport::ExponentialBackoff;
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(600), None);
/// assert_eq!(backoff.delay(0), Duration::from_secs(1));
/// assert_eq!(backoff.delay(3), Duration::from_secs(8));
/// assert_eq!(backoff.delay(40), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    /// `max` is clamped to [`MAX_RETRY_DELAY_MS`].
    pub fn new(base: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            max: max.min(Duration::from_millis(MAX_RETRY_DELAY_MS)),
            max_attempts,
        }
    }

    /// Delay to wait after `attempt` consecutive failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Whether another attempt is allowed after `failures` failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }

    /// Largest delay after clamping.
    pub fn max_delay(&self) -> Duration {
        self.max
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// When the next reconnect attempt may run.
#[derive(Debug, Clone)]
pub(crate) struct RetrySchedule {
    backoff: ExponentialBackoff,
    failures: u32,
    next_attempt: Option<Instant>,
}

impl RetrySchedule {
    pub(crate) fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: 0,
            next_attempt: None,
        }
    }

    /// Clears the failure count; the next attempt may run at once.
    pub(crate) fn reset(&mut self) {
        self.failures = 0;
        self.next_attempt = None;
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    /// Counts a failed attempt and schedules the next one.
    ///
    /// Returns the delay until that attempt, or `None` once the attempt
    /// limit is reached.
    pub(crate) fn record_failure(&mut self, now: Instant) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if !self.backoff.should_retry(self.failures) {
            return None;
        }
        let delay = self.backoff.delay(self.failures - 1);
        self.next_attempt = Some(now + delay);
        Some(delay)
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }
}
