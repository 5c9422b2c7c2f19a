//! Bounded re-prompt policy for malformed model output.

use std::time::Duration;

/// How often, and how patiently, the agent re-prompts after a parse failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Re-prompts allowed per invocation. `0` escalates on the first failure.
    pub max_attempts: u32,
    /// Delay before the first re-prompt.
    pub base_delay: Duration,
    /// Maximum backoff cap.
    pub max_delay: Duration,
    /// Multiplier per consecutive failure (typically 2.0).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Whether another re-prompt is allowed after `failures` parse failures.
    pub fn allows(&self, failures: u32) -> bool {
        failures <= self.max_attempts
    }

    /// Backoff before re-prompt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}
