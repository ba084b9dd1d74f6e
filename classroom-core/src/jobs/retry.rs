//! Retry semantics for provisioning jobs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a failure is safe to retry and, if so, after what delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The job may run again
    ///
    /// `after` is the minimum delay hinted by the remote host, e.g. from the
    /// rate-limit reset header. `None` means the queue's own schedule applies.
    Retryable { after: Option<Duration> },
    /// The job must not run again
    NonRetryable,
}

impl RetryPolicy {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

/// What the queue should do with a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Make the job visible again after the delay
    RetryIn(Duration),
    /// The failure is terminal
    Fail,
    /// The attempt budget is spent
    Exhausted,
}

/// Exponential backoff with a bounded attempt count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl Backoff {
    /// Delay after the `attempt`-th failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Decide the fate of a job whose `attempt`-th run failed with `policy`
    pub fn decide(&self, attempt: u32, policy: RetryPolicy) -> RetryDecision {
        match policy {
            RetryPolicy::NonRetryable => RetryDecision::Fail,
            RetryPolicy::Retryable { .. } if attempt >= self.max_attempts => {
                RetryDecision::Exhausted
            }
            RetryPolicy::Retryable { after } => {
                let delay = self.delay_for(attempt);
                RetryDecision::RetryIn(after.map_or(delay, |hint| hint.max(delay)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let b = backoff();
        assert_eq!(b.delay_for(1), Duration::from_secs(2));
        assert_eq!(b.delay_for(2), Duration::from_secs(4));
        assert_eq!(b.delay_for(3), Duration::from_secs(8));
        assert_eq!(b.delay_for(4), Duration::from_secs(10));
        assert_eq!(b.delay_for(200), Duration::from_secs(10));
    }

    #[test]
    fn test_decide() {
        let b = backoff();
        assert_eq!(b.decide(1, RetryPolicy::NonRetryable), RetryDecision::Fail);
        assert_eq!(
            b.decide(1, RetryPolicy::Retryable { after: None }),
            RetryDecision::RetryIn(Duration::from_secs(2))
        );
        assert_eq!(
            b.decide(4, RetryPolicy::Retryable { after: None }),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn test_rate_limit_hint_extends_delay() {
        let b = backoff();
        let policy = RetryPolicy::Retryable {
            after: Some(Duration::from_secs(60)),
        };
        assert_eq!(
            b.decide(1, policy),
            RetryDecision::RetryIn(Duration::from_secs(60))
        );
    }
}
