//! TaskContext - per-invocation state handed to a unit of work.
//!
//! The runner builds one context per attempt and drops it when the attempt
//! ends, so nothing about a previous attempt (ids, arguments, loaded rows)
//! leaks into the next one.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::children::ChildVerifier;
use super::policy::TaskPolicy;
use crate::domain::{Arguments, Status, TaskError, TaskId, TaskName};
use crate::error::RelayError;
use crate::ports::{Clock, TaskStore, WorkQueue};

/// Collaborators shared by every runner of an app.
#[derive(Clone)]
pub struct TaskServices {
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub clock: Arc<dyn Clock>,
    pub policy: TaskPolicy,
}

impl TaskServices {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn WorkQueue>,
        clock: Arc<dyn Clock>,
        policy: TaskPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            policy,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[derive(Clone)]
pub struct TaskContext {
    task_name: TaskName,
    task_id: Option<TaskId>,
    parent_id: Option<TaskId>,
    services: TaskServices,
}

impl TaskContext {
    pub(crate) fn tracked(
        task_name: TaskName,
        task_id: TaskId,
        parent_id: Option<TaskId>,
        services: TaskServices,
    ) -> Self {
        Self {
            task_name,
            task_id: Some(task_id),
            parent_id,
            services,
        }
    }

    pub(crate) fn untracked(task_name: TaskName, services: TaskServices) -> Self {
        Self {
            task_name,
            task_id: None,
            parent_id: None,
            services,
        }
    }

    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    /// `None` when the invocation carried no task id.
    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    pub fn parent_id(&self) -> Option<&TaskId> {
        self.parent_id.as_ref()
    }

    pub fn services(&self) -> &TaskServices {
        &self.services
    }

    fn verifier(&self) -> Result<ChildVerifier<'_>, RelayError> {
        let parent_id = self
            .task_id
            .as_ref()
            .ok_or_else(|| RelayError::MissingTaskId(self.task_name.clone()))?;
        Ok(ChildVerifier::new(parent_id, &self.services))
    }

    /// Reconciles every existing child of this task and returns their
    /// aggregate status.
    pub async fn verify_all_children(&self) -> Result<Status, RelayError> {
        self.verifier()?.verify_all().await
    }

    /// Reconciles the children named `task_name` against the expected
    /// `child_ids`, creating missing ones when `create` is set, and returns
    /// their aggregate status.
    ///
    /// `args_fn` builds the arguments of a child; the identity keys are
    /// injected afterwards.
    pub async fn verify_children<F>(
        &self,
        task_name: &TaskName,
        child_ids: &[TaskId],
        args_fn: F,
        create: bool,
    ) -> Result<Status, RelayError>
    where
        F: Fn(&TaskId) -> Arguments + Sync,
    {
        self.verifier()?
            .verify(task_name, child_ids, &args_fn, create)
            .await
    }
}

/// `Ok` when children are done, [`TaskError::NotFinished`] otherwise.
///
/// ```ignore
/// let status = ctx.verify_children(&name, &ids, args, true).await?;
/// require_finished(status)?;
/// ```
pub fn require_finished(status: Status) -> Result<(), TaskError> {
    if status.is_finished() {
        Ok(())
    } else {
        Err(TaskError::NotFinished)
    }
}
