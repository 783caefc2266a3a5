//! Exponential backoff for outbox redelivery

use std::env;
use std::time::Duration;

/// Backoff between delivery attempts of one pending delta.
///
/// The delay after the n-th failed attempt is `initial_delay * multiplier^(n-1)`,
/// capped at `max_delay`. Retryable failures (timeouts, no responder,
/// storage errors) are retried until they succeed. A delta the account
/// service keeps rejecting is parked after `max_rejections` attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Growth factor per failed attempt
    pub multiplier: f64,
    /// Attempts after which a non-retryable failure parks the delta
    pub max_rejections: u32,
}

/// Default bound on attempts ending in a non-retryable failure
pub const DEFAULT_MAX_REJECTIONS: u32 = 5;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_rejections: DEFAULT_MAX_REJECTIONS,
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            max_rejections: DEFAULT_MAX_REJECTIONS,
        }
    }

    /// Set the bound on non-retryable failures
    pub fn with_max_rejections(mut self, max_rejections: u32) -> Self {
        self.max_rejections = max_rejections.max(1);
        self
    }

    /// A policy that retries on the next poll
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Read the policy from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_delay: env::var("OUTBOX_INITIAL_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: env::var("OUTBOX_MAX_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            multiplier: defaults.multiplier,
            max_rejections: env::var("OUTBOX_MAX_REJECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|n: u32| n.max(1))
                .unwrap_or(defaults.max_rejections),
        }
    }

    /// Whether to park a delta after `failed_attempts` failures, the
    /// latest of which had the given retryability
    pub fn should_park(&self, failed_attempts: u32, retryable: bool) -> bool {
        !retryable && failed_attempts >= self.max_rejections
    }

    /// Delay before the next attempt, given how many attempts have failed
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts <= 1 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = (failed_attempts - 1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(10), 2.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 2.0);

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_only_rejections_are_parked() {
        let policy = RetryPolicy::immediate().with_max_rejections(3);

        assert!(!policy.should_park(2, false));
        assert!(policy.should_park(3, false));
        assert!(!policy.should_park(1_000, true));
        assert_eq!(RetryPolicy::default().max_rejections, DEFAULT_MAX_REJECTIONS);
        assert_eq!(RetryPolicy::immediate().with_max_rejections(0).max_rejections, 1);
    }

    #[test]
    fn test_immediate_policy() {
        assert_eq!(RetryPolicy::immediate().delay_for_attempt(7), Duration::ZERO);
    }
}
