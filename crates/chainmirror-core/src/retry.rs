//! Fixed-interval retry policy for the block indexer.

use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay between attempts. Does not grow.
    pub interval: Duration,
    /// Maximum number of retries; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_retries: None,
        }
    }
}

/// Stateless retry policy; computes the delay for a given attempt number.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Unbounded retries every `interval`.
    pub fn fixed(interval: Duration) -> Self {
        Self::new(RetryConfig {
            interval,
            max_retries: None,
        })
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` once `max_retries` is exceeded.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self.should_retry(attempt).then_some(self.config.interval)
    }

    /// Returns `true` if any retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_retries.map_or(true, |max| attempt <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_interval_never_grows() {
        let policy = RetryPolicy::fixed(Duration::from_millis(100));
        for attempt in [1, 2, 10, 10_000, u32::MAX] {
            assert_eq!(policy.next_delay(attempt), Some(Duration::from_millis(100)));
        }
    }

    #[test]
    fn bounded_policy_stops() {
        let policy = RetryPolicy::new(RetryConfig {
            interval: Duration::from_millis(5),
            max_retries: Some(2),
        });
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(policy.next_delay(3).is_none());
    }
}
