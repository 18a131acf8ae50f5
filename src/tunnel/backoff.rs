use std::time::Duration;

/// Exponential reconnect schedule with a delay ceiling and an attempt cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub growth_factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            growth_factor: 1.5,
            max_delay: Duration::from_millis(60_000),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-indexed):
    /// `min(base * factor^(attempt - 1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.base_delay.as_secs_f64() * self.growth_factor.powi(exponent as i32);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Whether another attempt may be scheduled after `attempts` so far.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
