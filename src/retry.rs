//! Worker-side retry policy for enrichment lookups.
//!
//! The core never retries on its own. A worker retries a retryable lookup
//! inline according to its policy, then records the failure on the workflow
//! record, where the reconciliation sweep can pick it up again.

use std::time::Duration;

/// Delay schedule between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// Doubling delay, capped.
    Exponential { initial: Duration, max: Duration },
}

/// How often and how patiently a worker retries a failing lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Doubling delay from 1 second, capped at 5 minutes.
    pub fn exponential(retries: u32) -> Self {
        Self {
            retries,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(300),
            },
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay before retry number `retry` (1-based), or `None` once the
    /// policy is exhausted.
    pub fn delay_before(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.retries {
            return None;
        }
        let delay = match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(retry - 1);
                initial.saturating_mul(factor).min(max)
            }
        };
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_retries() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.delay_before(1), None);
        assert_eq!(policy.retries(), 0);
    }

    #[test]
    fn test_fixed_delay_until_exhausted() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));
        assert_eq!(policy.delay_before(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_before(2), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_before(3), None);
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = RetryPolicy::exponential(10).with_backoff(Backoff::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        });
        assert_eq!(policy.delay_before(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_before(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_before(4), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_before(7), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_before(11), None);
    }
}
