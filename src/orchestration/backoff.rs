use std::time::Duration;

use crate::config::DispatcherConfig;

/// Exponential retry delay: `base * 2^(retry - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `retry_count` (1-based) becomes eligible
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

impl From<&DispatcherConfig> for BackoffPolicy {
    fn from(config: &DispatcherConfig) -> Self {
        Self::new(config.base_backoff(), config.max_backoff())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}
