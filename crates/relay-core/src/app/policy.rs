//! Task policy: delays and inactivity windows of the tracking protocol.

use std::time::Duration;

/// Re-queue delay after an attempt reports "not finished".
pub const CONTINUE_DELAY: Duration = Duration::from_secs(5);

/// Re-queue delay after a failed attempt. Longer, so a persistent failure
/// does not hot-loop.
pub const RETRY_DELAY: Duration = Duration::from_secs(60);

/// A task silent for longer than this is presumed stuck and gets nudged.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A child silent for longer than this is presumed dead and force-finished
/// as aborted.
pub const EXPIRE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct TaskPolicy {
    pub continue_delay: Duration,
    pub retry_delay: Duration,
    pub run_timeout: Duration,
    pub expire_timeout: Duration,

    /// Retries allowed before a failing task is dead-lettered
    /// (finished with a failure result). `None` retries forever.
    pub max_retries: Option<u32>,

    /// Whether `verify_all_children` re-enqueues children that are stale but
    /// not yet expired.
    pub rerun_stale_children: bool,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            continue_delay: CONTINUE_DELAY,
            retry_delay: RETRY_DELAY,
            run_timeout: RUN_TIMEOUT,
            expire_timeout: EXPIRE_TIMEOUT,
            max_retries: None,
            rerun_stale_children: false,
        }
    }
}

impl TaskPolicy {
    /// Has a task that already retried `num_retries` times used up its
    /// budget?
    pub fn retries_exhausted(&self, num_retries: u32) -> bool {
        self.max_retries.is_some_and(|max| num_retries >= max)
    }
}
