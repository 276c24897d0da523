use std::time::Duration;

/// Bounded retry schedule. The delay after failed attempt `n` (1-based) is
/// `initial_delay_ms * backoff_multiplier^(n-1)`, capped at `max_delay_ms`,
/// then spread by up to `jitter_ratio` in either direction.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
    pub jitter_ratio: f64,
}

impl RetryConfig {
    pub fn exponential(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2,
            jitter_ratio: 0.0,
        }
    }

    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1,
            jitter_ratio: 0.0,
        }
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay_ms = self
            .backoff_multiplier
            .saturating_pow(exponent)
            .saturating_mul(self.initial_delay_ms)
            .min(self.max_delay_ms);

        Duration::from_millis(delay_ms)
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio <= 0.0 {
            return base;
        }

        let jitter = rand::random_range(-self.jitter_ratio..=self.jitter_ratio);
        let jittered_ms = (base.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64;

        Duration::from_millis(jittered_ms)
    }
}
