//! Attempt outcome: what the runner did with one invocation.
//!
//! Producers never see this (there is no synchronous channel back to an
//! enqueuer); it is returned to the worker for logging and to tests.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    /// The unit of work returned normally and the row is finished.
    Succeeded,

    /// The unit of work asked to be called again; re-enqueued at the
    /// continue delay.
    NotFinished,

    /// The attempt failed and a retry was enqueued at the retry delay.
    RetryScheduled { num_retries: u32 },

    /// The attempt failed with the retry budget exhausted; the row is
    /// finished with a failure result.
    DeadLettered { num_retries: u32 },

    /// The row was already finished; nothing ran.
    Skipped,

    /// No task id: the unit of work ran once without any ledger tracking.
    Untracked,
}

impl AttemptOutcome {
    /// Did this attempt leave a follow-up invocation on the queue?
    pub fn requeued(self) -> bool {
        matches!(
            self,
            AttemptOutcome::NotFinished | AttemptOutcome::RetryScheduled { .. }
        )
    }
}
