//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

/// Retry policy for failed tasks.
///
/// delay(n) = min(max_delay, base_delay * multiplier^n * U(1 - jitter, 1 + jitter))
///
/// With `jitter <= (multiplier - 1) / (multiplier + 1)` the worst-case
/// jittered delay for retry n never exceeds the best case for retry n + 1,
/// so successive delays are non-decreasing until the cap.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry (retry_count = 0).
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Relative jitter in [0, 1).
    pub jitter: f64,

    /// Upper bound applied after jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub fn without_jitter(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            jitter: 0.0,
            max_delay,
        }
    }

    /// Largest jitter that keeps successive delays monotonic.
    pub fn max_monotonic_jitter(multiplier: f64) -> f64 {
        (multiplier - 1.0) / (multiplier + 1.0)
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let unit = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_unit(retry_count, unit)
    }

    /// Deterministic core of `next_delay`; `unit` in [-1, 1] scales the jitter.
    pub fn delay_with_unit(&self, retry_count: u32, unit: f64) -> Duration {
        let cap = self.max_delay.as_secs_f64();
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let jittered = raw * (1.0 + self.jitter * unit.clamp(-1.0, 1.0));

        // powi overflows to inf for large retry counts; the cap absorbs it.
        if !jittered.is_finite() || jittered >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(jittered.max(0.0))
    }
}
