//! Task record: one row of the task ledger.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Arguments, Status, TaskId, TaskName, TaskResult};

/// Natural key of a ledger row.
///
/// The triple is unique within a store; there is no surrogate key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub task_name: TaskName,
    pub parent_id: Option<TaskId>,
    pub task_id: TaskId,
}

impl TaskKey {
    pub fn new(task_name: TaskName, parent_id: Option<TaskId>, task_id: TaskId) -> Self {
        Self {
            task_name,
            parent_id,
            task_id,
        }
    }

    /// Key of a root task (no parent).
    pub fn root(task_name: TaskName, task_id: TaskId) -> Self {
        Self::new(task_name, None, task_id)
    }

    /// Key of a child of `parent_id`.
    pub fn child(task_name: TaskName, parent_id: TaskId, task_id: TaskId) -> Self {
        Self::new(task_name, Some(parent_id), task_id)
    }
}

/// Fields used when a row is created.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub status: Status,

    /// Arguments (without identity keys) the task will be invoked with.
    pub arguments: Option<Arguments>,

    /// Creation time; also the initial `date_modified`.
    pub now: DateTime<Utc>,
}

impl NewTask {
    pub fn queued(now: DateTime<Utc>) -> Self {
        Self {
            status: Status::Queued,
            arguments: None,
            now,
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// Ledger entry of one logical task, tracked across all of its attempts.
///
/// Values returned by a [`crate::ports::TaskStore`] are snapshots. Later
/// store updates never reach them; re-query for fresh state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub key: TaskKey,
    pub status: Status,
    pub result: TaskResult,

    /// Failure-triggered retries so far. "Not finished" continuations do not
    /// count.
    pub num_retries: u32,

    /// Last enqueued arguments, if the producer recorded them.
    pub arguments: Option<Arguments>,

    pub date_created: DateTime<Utc>,

    /// Advanced on every transition; the only staleness signal.
    pub date_modified: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_finished: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(key: TaskKey, fields: NewTask) -> Self {
        Self {
            key,
            status: fields.status,
            result: TaskResult::Unknown,
            num_retries: 0,
            arguments: fields.arguments,
            date_created: fields.now,
            date_modified: fields.now,
            date_started: None,
            date_finished: None,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.key.task_id
    }

    pub fn task_name(&self) -> &TaskName {
        &self.key.task_name
    }

    /// Time since the last check-in. Negative ages (clock skew) count as zero.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.date_modified)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// An unfinished task that has not checked in for longer than
    /// `run_timeout` is presumed stuck and should be nudged.
    pub fn needs_requeue(&self, now: DateTime<Utc>, run_timeout: Duration) -> bool {
        !self.status.is_finished() && self.idle_for(now) > run_timeout
    }

    /// An unfinished task silent for longer than `expire_timeout` is presumed
    /// dead.
    pub fn is_expired(&self, now: DateTime<Utc>, expire_timeout: Duration) -> bool {
        !self.status.is_finished() && self.idle_for(now) > expire_timeout
    }
}
