//! Exponential backoff schedule for job retries.

use std::time::Duration;

/// Deterministic exponential backoff: `base * 2^attempt`, capped.
///
/// No jitter: the fan-out and test contracts rely on the exact schedule
/// (1s, 2s, 4s, ... for the default base).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before republishing attempt `attempt + 1`, where `attempt` is
    /// the number of failures already observed (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(60),
        }
    }
}
