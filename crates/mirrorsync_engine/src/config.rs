//! Configuration for the sync engine.

use std::time::Duration;

/// Exponential backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Creates a doubling backoff between `initial_delay` and `max_delay`.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Creates a schedule that always waits `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Returns the delay after the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        // f64 rounding can push a cap near Duration::MAX out of range.
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

impl Default for BackoffConfig {
    /// 250ms doubling up to 5s.
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(5))
    }
}

/// How long a message may wait for its dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    /// Budget for force-sync messages.
    pub force_sync_max_wait: Duration,
    /// Budget for organic messages.
    pub organic_max_wait: Duration,
    /// Probe schedule.
    pub backoff: BackoffConfig,
}

impl WaitConfig {
    /// Returns the budget for a message.
    pub fn max_wait_for(&self, is_force_sync: bool) -> Duration {
        if is_force_sync {
            self.force_sync_max_wait
        } else {
            self.organic_max_wait
        }
    }

    /// Sets the force-sync budget.
    pub fn with_force_sync_max_wait(mut self, wait: Duration) -> Self {
        self.force_sync_max_wait = wait;
        self
    }

    /// Sets the organic budget.
    pub fn with_organic_max_wait(mut self, wait: Duration) -> Self {
        self.organic_max_wait = wait;
        self
    }

    /// Sets the probe schedule.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            force_sync_max_wait: Duration::from_secs(30),
            organic_max_wait: Duration::from_secs(300),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Redelivery policy of the in-memory bus.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of delivery attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: BackoffConfig,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(30)),
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before the given attempt (0-indexed). The first attempt is
    /// never delayed.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.backoff.delay_for_attempt(attempt - 1)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration of a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Dependency wait budgets.
    pub wait: WaitConfig,
    /// Maximum messages processed at once by `Consumer::run`.
    pub max_concurrency: usize,
}

impl ConsumerConfig {
    /// Sets the wait configuration.
    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the concurrency limit.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            max_concurrency: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_and_caps() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(4));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn huge_cap_does_not_overflow() {
        let backoff = BackoffConfig::new(Duration::from_secs(u64::MAX / 2), Duration::MAX);
        assert_eq!(backoff.delay_for_attempt(3), Duration::MAX);
        assert_eq!(BackoffConfig::fixed(Duration::MAX).delay_for_attempt(0), Duration::MAX);
    }

    #[test]
    fn fixed_backoff() {
        let backoff = BackoffConfig::fixed(Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn wait_budgets() {
        let wait = WaitConfig::default();
        assert_eq!(wait.max_wait_for(true), Duration::from_secs(30));
        assert_eq!(wait.max_wait_for(false), Duration::from_secs(300));

        let wait = wait.with_organic_max_wait(Duration::from_secs(10));
        assert_eq!(wait.max_wait_for(false), Duration::from_secs(10));
    }

    #[test]
    fn retry_first_attempt_is_immediate() {
        let retry = RetryConfig::new(3)
            .with_backoff(BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(1)));
        assert_eq!(retry.delay_before_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_before_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_before_attempt(2), Duration::from_millis(200));
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }

    #[test]
    fn consumer_config_builder() {
        let config = ConsumerConfig::default().with_max_concurrency(0);
        assert_eq!(config.max_concurrency, 1);
    }
}
