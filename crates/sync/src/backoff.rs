//! Retry budget shared by the pipeline consumer and the poller.

use std::time::Duration;

/// Backoff schedule in seconds, indexed by consecutive-error count.
const ERROR_TIMEOUT_SECS: [u64; 14] = [1, 2, 5, 10, 30, 60, 60, 60, 60, 60, 60, 60, 60, 60];

/// Consecutive failures at which an error budget promotes to fatal.
pub const MAX_CONSECUTIVE_ERRORS: usize = ERROR_TIMEOUT_SECS.len();

/// Tracks consecutive retryable failures and hands out backoff delays until
/// the budget is exhausted.
#[derive(Debug, Default)]
pub struct ErrorBudget {
    consecutive: usize,
}

impl ErrorBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Returns the delay to sleep before retrying, or
    /// `None` once the failure should be promoted to fatal.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_ERRORS {
            return None;
        }
        Some(Duration::from_secs(ERROR_TIMEOUT_SECS[self.consecutive - 1]))
    }

    /// A success resets the budget.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> usize {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_grows_then_plateaus() {
        let mut budget = ErrorBudget::new();
        assert_eq!(budget.record_failure(), Some(Duration::from_secs(1)));
        assert_eq!(budget.record_failure(), Some(Duration::from_secs(2)));
        assert_eq!(budget.record_failure(), Some(Duration::from_secs(5)));
        assert_eq!(budget.record_failure(), Some(Duration::from_secs(10)));
        assert_eq!(budget.record_failure(), Some(Duration::from_secs(30)));
        assert_eq!(budget.record_failure(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn fourteenth_consecutive_failure_is_fatal() {
        let mut budget = ErrorBudget::new();
        for _ in 0..MAX_CONSECUTIVE_ERRORS - 1 {
            assert!(budget.record_failure().is_some());
        }
        assert_eq!(budget.record_failure(), None);
    }

    #[test]
    fn success_resets_the_budget() {
        let mut budget = ErrorBudget::new();
        for _ in 0..MAX_CONSECUTIVE_ERRORS - 1 {
            budget.record_failure();
        }
        budget.reset();
        assert_eq!(budget.consecutive(), 0);
        assert_eq!(budget.record_failure(), Some(Duration::from_secs(1)));
    }
}
