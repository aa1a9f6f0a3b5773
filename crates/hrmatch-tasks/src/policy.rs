//! Retry scheduling for failed tasks.

use std::time::Duration;

use hrmatch_core::defaults::RETRY_DELAYS_SECS;
use hrmatch_core::Task;

/// Tiered backoff: the delay for attempt `n` is tier `n`, clamped to the last tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RETRY_DELAYS_SECS.iter().map(|s| Duration::from_secs(*s)))
    }
}

impl RetryPolicy {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    /// Retry immediately; for tests.
    pub fn immediate() -> Self {
        Self::new([Duration::ZERO])
    }

    /// Delay before retry attempt `attempt` (0-based count of prior retries).
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let Some(last) = self.delays.last() else {
            return Duration::ZERO;
        };
        let idx = attempt.max(0) as usize;
        self.delays.get(idx).copied().unwrap_or(*last)
    }

    /// Whether the task has retries left.
    pub fn should_retry(&self, task: &Task) -> bool {
        task.retry_count < task.max_retries
    }
}
