//! Child verification: reconcile a parent's children against the ledger.
//!
//! # フロー
//! 1. 子タスクの行を読む
//! 2. 分類: finished（無視）/ expired（aborted で強制終了）/ pending（必要なら再実行）
//! 3. 一括更新（expire → touch → 作成）
//! 4. 書き込みが終わってから enqueue
//! 5. 集約ステータスを返す

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::context::TaskServices;
use crate::domain::invocation::{with_identity, without_identity};
use crate::domain::{Arguments, NewTask, Status, TaskId, TaskKey, TaskName, TaskRecord, TaskResult};
use crate::error::RelayError;
use crate::ports::{TaskFilter, TaskUpdate};

pub(crate) struct ChildVerifier<'a> {
    parent_id: &'a TaskId,
    services: &'a TaskServices,
}

/// Per-child verdicts of one verification pass.
#[derive(Debug, Default)]
struct Classification {
    /// Expired children, grouped by task name.
    need_expire: HashMap<TaskName, Vec<TaskId>>,

    /// Pending children that are individually stale.
    need_run: Vec<TaskRecord>,

    has_pending: bool,
}

impl Classification {
    fn of(
        children: Vec<TaskRecord>,
        now: DateTime<Utc>,
        run_timeout: Duration,
        expire_timeout: Duration,
    ) -> Self {
        let mut classification = Self::default();
        for child in children {
            if child.status.is_finished() {
                continue;
            }
            if child.is_expired(now, expire_timeout) {
                classification
                    .need_expire
                    .entry(child.key.task_name.clone())
                    .or_default()
                    .push(child.key.task_id.clone());
                continue;
            }
            classification.has_pending = true;
            if child.needs_requeue(now, run_timeout) {
                classification.need_run.push(child);
            }
        }
        classification
    }
}

impl<'a> ChildVerifier<'a> {
    pub(crate) fn new(parent_id: &'a TaskId, services: &'a TaskServices) -> Self {
        Self {
            parent_id,
            services,
        }
    }

    fn children(&self, task_name: &TaskName) -> TaskFilter {
        TaskFilter::children_of(self.parent_id).named(task_name)
    }

    async fn expire(
        &self,
        need_expire: HashMap<TaskName, Vec<TaskId>>,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        for (task_name, task_ids) in need_expire {
            let expired = self
                .services
                .store
                .update_where(
                    &self.children(&task_name).ids(task_ids).unfinished(),
                    &TaskUpdate::touch(now)
                        .status(Status::Finished)
                        .result(TaskResult::Aborted),
                )
                .await?;
            warn!(
                parent_id = %self.parent_id,
                task_name = %task_name,
                expired,
                "expired silent child tasks"
            );
        }
        Ok(())
    }

    async fn touch(
        &self,
        task_name: &TaskName,
        task_ids: Vec<TaskId>,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        if task_ids.is_empty() {
            return Ok(());
        }
        self.services
            .store
            .update_where(
                &self.children(task_name).ids(task_ids).unfinished(),
                &TaskUpdate::touch(now),
            )
            .await?;
        Ok(())
    }

    async fn launch(
        &self,
        task_name: &TaskName,
        task_id: &TaskId,
        arguments: Arguments,
    ) -> Result<(), RelayError> {
        let arguments = with_identity(arguments, task_id, Some(self.parent_id));
        self.services
            .queue
            .enqueue(task_name, arguments, Duration::ZERO)
            .await?;
        Ok(())
    }

    /// Reconciles every existing child, whatever its name.
    ///
    /// Children stale beyond the run timeout count as pending. They are only
    /// re-enqueued when the policy enables `rerun_stale_children`, and only
    /// if their row carries the arguments to replay.
    pub(crate) async fn verify_all(&self) -> Result<Status, RelayError> {
        let policy = &self.services.policy;
        let children = self
            .services
            .store
            .query(&TaskFilter::children_of(self.parent_id))
            .await?;

        let now = self.services.now();
        let Classification {
            need_expire,
            need_run,
            has_pending,
        } = Classification::of(children, now, policy.run_timeout, policy.expire_timeout);

        self.expire(need_expire, now).await?;

        if policy.rerun_stale_children && !need_run.is_empty() {
            // children without stored arguments keep ageing toward expiry
            let mut rerun: Vec<(TaskKey, Arguments)> = Vec::new();
            for child in need_run {
                match child.arguments {
                    Some(arguments) => rerun.push((child.key, arguments)),
                    None => debug!(
                        task_id = %child.key.task_id,
                        "stale child has no stored arguments, cannot re-run"
                    ),
                }
            }

            let mut by_name: HashMap<TaskName, Vec<TaskId>> = HashMap::new();
            for (key, _) in &rerun {
                by_name
                    .entry(key.task_name.clone())
                    .or_default()
                    .push(key.task_id.clone());
            }
            for (task_name, task_ids) in by_name {
                self.touch(&task_name, task_ids, now).await?;
            }

            for (key, arguments) in rerun {
                info!(
                    parent_id = %self.parent_id,
                    task_name = %key.task_name,
                    task_id = %key.task_id,
                    "re-running stale child"
                );
                self.launch(&key.task_name, &key.task_id, arguments).await?;
            }
        }

        Ok(aggregate(has_pending))
    }

    /// Reconciles children named `task_name` against `child_ids`.
    pub(crate) async fn verify<F>(
        &self,
        task_name: &TaskName,
        child_ids: &[TaskId],
        args_fn: &F,
        create: bool,
    ) -> Result<Status, RelayError>
    where
        F: Fn(&TaskId) -> Arguments + Sync,
    {
        if child_ids.is_empty() {
            return Ok(Status::Finished);
        }

        let policy = &self.services.policy;
        let children = self.services.store.query(&self.children(task_name)).await?;

        let existing: HashSet<&TaskId> = children.iter().map(|c| &c.key.task_id).collect();
        let mut seen = HashSet::new();
        let need_created: Vec<TaskId> = if create {
            child_ids
                .iter()
                .filter(|id| !existing.contains(id) && seen.insert(*id))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let now = self.services.now();
        let Classification {
            need_expire,
            need_run,
            has_pending,
        } = Classification::of(children, now, policy.run_timeout, policy.expire_timeout);

        self.expire(need_expire, now).await?;

        let mut need_run: Vec<(TaskId, Arguments)> = need_run
            .into_iter()
            .map(|c| {
                let arguments = args_fn(&c.key.task_id);
                (c.key.task_id, arguments)
            })
            .collect();
        let stale: Vec<TaskId> = need_run.iter().map(|(id, _)| id.clone()).collect();
        self.touch(task_name, stale, now).await?;

        for child_id in &need_created {
            let key = TaskKey::child(task_name.clone(), self.parent_id.clone(), child_id.clone());
            // stored and launched arguments come from the same call
            let arguments = args_fn(child_id);
            let fields = NewTask::queued(now).with_arguments(without_identity(&arguments));
            if self.services.store.create_if_absent(&key, fields).await?.is_some() {
                need_run.push((child_id.clone(), arguments));
            }
        }

        // ledger writes are done; only now hand children to the queue
        for (child_id, arguments) in &need_run {
            self.launch(task_name, child_id, arguments.clone()).await?;
        }

        debug!(
            parent_id = %self.parent_id,
            task_name = %task_name,
            created = need_created.len(),
            launched = need_run.len(),
            has_pending,
            "verified children"
        );

        Ok(aggregate(
            has_pending || !need_created.is_empty() || !need_run.is_empty(),
        ))
    }
}

fn aggregate(pending: bool) -> Status {
    if pending {
        Status::InProgress
    } else {
        Status::Finished
    }
}
