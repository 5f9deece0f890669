//! Fixed-delay retry policy
//!
//! The consumer reconnect loop and the producer's unroutable retry both run
//! "wait, then try again" state machines. The delay and the give-up point
//! are explicit; the default never gives up, which is what a long-lived
//! connector daemon wants.

use std::time::Duration;

/// Retry policy with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between two attempts
    pub delay: Duration,
    /// Maximum number of attempts, `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Retry forever with a fixed delay
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Retry up to `max_attempts` times with a fixed delay
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    /// Set max attempts (builder pattern)
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether another attempt is allowed after `attempts` failed ones
    pub fn should_retry(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }

    /// Count one more failed attempt and tell whether to try again.
    /// The counter saturates, so a forever policy never overflows it.
    pub fn record_failure(&self, attempts: &mut u32) -> bool {
        *attempts = attempts.saturating_add(1);
        self.should_retry(*attempts)
    }

    /// Sleep for the configured delay
    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forever_never_gives_up() {
        let policy = RetryPolicy::forever(Duration::from_millis(10));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn test_bounded() {
        let policy = RetryPolicy::bounded(3, Duration::ZERO);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_builder() {
        let policy = RetryPolicy::default().with_max_attempts(Some(5));
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_record_failure_saturates() {
        let forever = RetryPolicy::forever(Duration::ZERO);
        let mut attempts = u32::MAX - 1;
        assert!(forever.record_failure(&mut attempts));
        assert!(forever.record_failure(&mut attempts));
        assert_eq!(attempts, u32::MAX);

        let bounded = RetryPolicy::bounded(2, Duration::ZERO);
        let mut attempts = 0;
        assert!(bounded.record_failure(&mut attempts));
        assert!(!bounded.record_failure(&mut attempts));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_uses_delay() {
        let policy = RetryPolicy::forever(Duration::from_secs(10));
        let started = tokio::time::Instant::now();
        policy.wait().await;
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
