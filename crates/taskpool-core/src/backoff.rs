//! Exponential backoff shared by slot restarts and store retries.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with an optional jitter fraction.
///
/// `delay(n) = min(base_delay * multiplier^(n-1), max_delay)`, with
/// `n` the 1-based attempt number. With `jitter > 0` the delay is drawn
/// uniformly from `[delay * (1 - jitter), delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Fraction in `[0, 1]` of the delay that may be shaved off at random.
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Doubling backoff without jitter.
    pub fn doubling(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Builder method to set the jitter fraction (clamped to `[0, 1]`,
    /// NaN reads as no jitter).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() {
            0.0
        } else {
            jitter.clamp(0.0, 1.0)
        };
        self
    }

    /// Deterministic delay for attempt `attempt` (1-based), before jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Delay for attempt `attempt` (1-based), jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter.is_nan() || self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let jitter = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        nominal.mul_f64(factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::doubling(Duration::from_secs(1), Duration::from_secs(60)).with_jitter(0.1)
    }
}
