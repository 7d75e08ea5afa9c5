//! Bounded retry policy for timed-out test cases.

use fleet_types::TestStatus;

/// Default number of attempts before a test case is marked FAILED.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Decides what happens to a test case whose worker timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

/// Result of applying the policy to one timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to TO_START, eligible for any worker of the same class.
    Requeue {
        /// Retry count after this timeout.
        retry_count: u32,
    },
    /// Retries exhausted: FAILED, never attempted again.
    Exhausted {
        /// Retry count after this timeout (equals the maximum).
        retry_count: u32,
    },
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` timed-out attempts.
    ///
    /// A maximum of zero is treated as one: the first timeout fails the case.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    /// The configured maximum.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Apply one timeout to a test case that had `retry_count` prior timeouts.
    pub fn after_timeout(&self, retry_count: u32) -> RetryDecision {
        let retry_count = retry_count.saturating_add(1);
        if retry_count >= self.max_retries {
            RetryDecision::Exhausted {
                retry_count: self.max_retries,
            }
        } else {
            RetryDecision::Requeue { retry_count }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryDecision {
    /// Status to persist.
    pub fn status(&self) -> TestStatus {
        match self {
            Self::Requeue { .. } => TestStatus::ToStart,
            Self::Exhausted { .. } => TestStatus::Failed,
        }
    }

    /// Retry count to persist.
    pub fn retry_count(&self) -> u32 {
        match self {
            Self::Requeue { retry_count } | Self::Exhausted { retry_count } => *retry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requeues_until_maximum() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.after_timeout(0),
            RetryDecision::Requeue { retry_count: 1 }
        );
        assert_eq!(
            policy.after_timeout(1),
            RetryDecision::Requeue { retry_count: 2 }
        );
        assert_eq!(
            policy.after_timeout(2),
            RetryDecision::Exhausted { retry_count: 3 }
        );
    }

    #[test]
    fn exhausted_never_exceeds_maximum() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.after_timeout(7),
            RetryDecision::Exhausted { retry_count: 3 }
        );
    }

    #[test]
    fn decision_statuses() {
        assert_eq!(
            RetryDecision::Requeue { retry_count: 1 }.status(),
            TestStatus::ToStart
        );
        assert_eq!(
            RetryDecision::Exhausted { retry_count: 3 }.status(),
            TestStatus::Failed
        );
    }

    #[test]
    fn zero_maximum_fails_first_timeout() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_retries(), 1);
        assert_eq!(
            policy.after_timeout(0),
            RetryDecision::Exhausted { retry_count: 1 }
        );
    }

    #[test]
    fn default_allows_three() {
        assert_eq!(RetryPolicy::default().max_retries(), DEFAULT_MAX_RETRIES);
    }
}
