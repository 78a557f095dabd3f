//! TrackedTask - ledger-tracked runner around a unit of work.
//!
//! # 1 attempt のフロー
//! 1. lock（同じ runner の呼び出しは直列化）
//! 2. arguments から task_id / parent_task_id を取り出す
//! 3. ledger 行を find_or_create（finished なら skip）
//! 4. unit of work を実行
//! 5. 結果に応じて状態を書き、必要なら再投入
//!
//! 状態の書き込みはすべて `status != finished` 条件付き。別の worker が先に
//! 終わらせた行を巻き戻さない。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::context::{TaskContext, TaskServices};
use super::work::UnitOfWork;
use crate::domain::invocation::{take_id, with_identity};
use crate::domain::{
    Arguments, AttemptOutcome, NewTask, PARENT_TASK_ID_ARG, Status, TASK_ID_ARG, TaskError,
    TaskId, TaskKey, TaskName, TaskResult,
};
use crate::error::RelayError;
use crate::ports::{TaskFilter, TaskUpdate};

/// An invocation whose identity has been split off its arguments.
struct Identified {
    key: TaskKey,

    /// Arguments without identity keys.
    arguments: Arguments,
}

impl Identified {
    fn task_id(&self) -> &TaskId {
        &self.key.task_id
    }

    fn parent_id(&self) -> Option<&TaskId> {
        self.key.parent_id.as_ref()
    }

    /// Arguments to hand back to the queue; identical to what came in.
    fn replay(&self) -> Arguments {
        with_identity(self.arguments.clone(), self.task_id(), self.parent_id())
    }

    fn unfinished(&self) -> TaskFilter {
        TaskFilter::key(&self.key).unfinished()
    }
}

pub struct TrackedTask {
    name: TaskName,
    work: Arc<dyn UnitOfWork>,
    services: TaskServices,
    lock: Mutex<()>,
}

impl std::fmt::Debug for TrackedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TrackedTask {
    pub fn new(name: TaskName, work: Arc<dyn UnitOfWork>, services: TaskServices) -> Self {
        Self {
            name,
            work,
            services,
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn services(&self) -> &TaskServices {
        &self.services
    }

    fn identify(&self, mut arguments: Arguments) -> Result<Identified, Arguments> {
        let task_id = take_id(&mut arguments, TASK_ID_ARG);
        let parent_id = take_id(&mut arguments, PARENT_TASK_ID_ARG);
        match task_id {
            Some(task_id) => Ok(Identified {
                key: TaskKey::new(self.name.clone(), parent_id, task_id),
                arguments,
            }),
            None => Err(arguments),
        }
    }

    fn require_identity(&self, arguments: Arguments) -> Result<Identified, RelayError> {
        self.identify(arguments)
            .map_err(|_| RelayError::MissingTaskId(self.name.clone()))
    }

    /// Runs one attempt of this task.
    ///
    /// Only a failure to schedule follow-up work is returned as an error;
    /// everything the unit of work reports ends up in the ledger.
    pub async fn invoke(&self, arguments: Arguments) -> Result<AttemptOutcome, RelayError> {
        let _guard = self.lock.lock().await;

        let task = match self.identify(arguments) {
            Ok(task) => task,
            Err(arguments) => return Ok(self.run_untracked(arguments).await),
        };

        let now = self.services.now();
        let fields = NewTask::queued(now).with_arguments(task.arguments.clone());
        let record = match self.services.store.find_or_create(&task.key, fields).await {
            Ok((record, _)) => record,
            Err(err) => {
                error!(
                    task_name = %self.name,
                    task_id = %task.task_id(),
                    error = %err,
                    "failed to load task record"
                );
                return self.retry(&task, None).await;
            }
        };

        if record.status.is_finished() {
            debug!(
                task_name = %self.name,
                task_id = %task.task_id(),
                "task already finished, skipping replay"
            );
            return Ok(AttemptOutcome::Skipped);
        }

        let started = self.services.now();
        let ctx = TaskContext::tracked(
            self.name.clone(),
            task.task_id().clone(),
            task.parent_id().cloned(),
            self.services.clone(),
        );

        match self.work.run(ctx, task.arguments.clone()).await {
            Ok(()) => match self.finish(&task, started).await {
                Ok(true) => Ok(AttemptOutcome::Succeeded),
                Ok(false) => Ok(self.finished_elsewhere(&task)),
                Err(err) => {
                    error!(task_name = %self.name, task_id = %task.task_id(), error = %err, "failed to record success");
                    self.retry(&task, Some(record.num_retries)).await
                }
            },
            Err(TaskError::NotFinished) => self.continue_later(&task, record.num_retries).await,
            Err(TaskError::Failed(err)) => {
                error!(
                    task_name = %self.name,
                    task_id = %task.task_id(),
                    parent_id = ?task.parent_id(),
                    num_retries = record.num_retries,
                    error = %err,
                    "task attempt failed"
                );
                self.retry(&task, Some(record.num_retries)).await
            }
        }
    }

    async fn run_untracked(&self, arguments: Arguments) -> AttemptOutcome {
        warn!(task_name = %self.name, "missing task_id, running without tracking");
        let ctx = TaskContext::untracked(self.name.clone(), self.services.clone());
        if let Err(err) = self.work.run(ctx, arguments).await {
            warn!(task_name = %self.name, error = %err, "untracked task did not complete");
        }
        AttemptOutcome::Untracked
    }

    fn finished_elsewhere(&self, task: &Identified) -> AttemptOutcome {
        info!(
            task_name = %self.name,
            task_id = %task.task_id(),
            "task was finished concurrently, dropping attempt"
        );
        AttemptOutcome::Skipped
    }

    async fn write(&self, task: &Identified, update: TaskUpdate) -> Result<bool, RelayError> {
        let changed = self
            .services
            .store
            .update_where(&task.unfinished(), &update)
            .await?;
        Ok(changed > 0)
    }

    async fn finish(&self, task: &Identified, started: DateTime<Utc>) -> Result<bool, RelayError> {
        let now = self.services.now();
        self.write(
            task,
            TaskUpdate::touch(now)
                .status(Status::Finished)
                .result(TaskResult::Success)
                .started(started)
                .finished(now),
        )
        .await
    }

    async fn enqueue(&self, task: &Identified, delay: Duration) -> Result<(), RelayError> {
        self.services
            .queue
            .enqueue(&self.name, task.replay(), delay)
            .await?;
        Ok(())
    }

    async fn continue_later(
        &self,
        task: &Identified,
        num_retries: u32,
    ) -> Result<AttemptOutcome, RelayError> {
        let update = TaskUpdate::touch(self.services.now()).status(Status::InProgress);
        match self.write(task, update).await {
            Ok(true) => {}
            Ok(false) => return Ok(self.finished_elsewhere(task)),
            Err(err) => {
                error!(task_name = %self.name, task_id = %task.task_id(), error = %err, "failed to record progress");
                return self.retry(task, Some(num_retries)).await;
            }
        }

        self.enqueue(task, self.services.policy.continue_delay).await?;
        debug!(task_name = %self.name, task_id = %task.task_id(), "task not finished, continuing later");
        Ok(AttemptOutcome::NotFinished)
    }

    /// `known_retries` is `None` when the row could not be read.
    async fn retry(
        &self,
        task: &Identified,
        known_retries: Option<u32>,
    ) -> Result<AttemptOutcome, RelayError> {
        let policy = &self.services.policy;
        let now = self.services.now();

        if let Some(num_retries) = known_retries
            && policy.retries_exhausted(num_retries)
        {
            let update = TaskUpdate::touch(now)
                .status(Status::Finished)
                .result(TaskResult::Failure)
                .finished(now);
            match self.write(task, update).await {
                Ok(true) => {
                    error!(
                        task_name = %self.name,
                        task_id = %task.task_id(),
                        num_retries,
                        "retry budget exhausted, task dead-lettered"
                    );
                    return Ok(AttemptOutcome::DeadLettered { num_retries });
                }
                Ok(false) => return Ok(self.finished_elsewhere(task)),
                // keep the task scheduled; the next attempt dead-letters again
                Err(err) => warn!(
                    task_name = %self.name,
                    task_id = %task.task_id(),
                    error = %err,
                    "failed to dead-letter task"
                ),
            }
        }

        let update = TaskUpdate::touch(now)
            .status(Status::InProgress)
            .increment_retries();
        match self.write(task, update).await {
            Ok(true) => {}
            Ok(false) => return Ok(self.finished_elsewhere(task)),
            // the retry is still scheduled; the next attempt writes again
            Err(err) => warn!(
                task_name = %self.name,
                task_id = %task.task_id(),
                error = %err,
                "failed to record retry"
            ),
        }

        self.enqueue(task, policy.retry_delay).await?;

        let num_retries = known_retries.unwrap_or(0) + 1;
        info!(
            task_name = %self.name,
            task_id = %task.task_id(),
            num_retries,
            delay_secs = policy.retry_delay.as_secs(),
            "retry scheduled"
        );
        Ok(AttemptOutcome::RetryScheduled { num_retries })
    }

    /// Records the task as queued (if it is new) and enqueues it at the
    /// continue delay.
    pub async fn delay(&self, arguments: Arguments) -> Result<(), RelayError> {
        let task = self.require_identity(arguments)?;
        let fields = NewTask::queued(self.services.now()).with_arguments(task.arguments.clone());
        let created = self
            .services
            .store
            .create_if_absent(&task.key, fields)
            .await?
            .is_some();
        if created {
            debug!(task_name = %self.name, task_id = %task.task_id(), "task recorded");
        } else {
            self.write(&task, TaskUpdate::default().arguments(task.arguments.clone()))
                .await?;
        }
        self.enqueue(&task, self.services.policy.continue_delay).await
    }

    /// Enqueues the task only when it is new or has gone silent for longer
    /// than the run timeout. Returns whether it was enqueued.
    pub async fn delay_if_needed(&self, arguments: Arguments) -> Result<bool, RelayError> {
        let task = self.require_identity(arguments)?;
        let now = self.services.now();
        let fields = NewTask::queued(now).with_arguments(task.arguments.clone());
        let (record, created) = self.services.store.find_or_create(&task.key, fields).await?;

        if created {
            self.enqueue(&task, self.services.policy.continue_delay).await?;
            return Ok(true);
        }

        if !record.needs_requeue(now, self.services.policy.run_timeout) {
            debug!(
                task_name = %self.name,
                task_id = %task.task_id(),
                status = %record.status,
                "task is fresh, not enqueuing"
            );
            return Ok(false);
        }

        // touch so that a burst of rescue requests collapses into one
        if !self.write(&task, TaskUpdate::touch(now)).await? {
            return Ok(false);
        }
        info!(task_name = %self.name, task_id = %task.task_id(), "rescuing stale task");
        self.enqueue(&task, self.services.policy.continue_delay).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TaskPolicy;
    use crate::app::work::work_fn;
    use crate::impls::{InMemoryTaskStore, InMemoryWorkQueue};
    use crate::ports::{Clock, FixedClock, QueueError, StoreError, TaskStore, WorkQueue};
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        queue: Arc<InMemoryWorkQueue>,
        clock: Arc<FixedClock>,
        services: TaskServices,
    }

    impl Fixture {
        fn new(policy: TaskPolicy) -> Self {
            let store = Arc::new(InMemoryTaskStore::new());
            let queue = Arc::new(InMemoryWorkQueue::new());
            let clock = Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            ));
            let services = TaskServices::new(store.clone(), queue.clone(), clock.clone(), policy);
            Self {
                store,
                queue,
                clock,
                services,
            }
        }

        fn task<W: UnitOfWork + 'static>(&self, name: &str, work: W) -> TrackedTask {
            TrackedTask::new(TaskName::new(name), Arc::new(work), self.services.clone())
        }

        async fn record(&self, key: &TaskKey) -> crate::domain::TaskRecord {
            self.store.get(key).await.unwrap().unwrap()
        }
    }

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn abc_key() -> TaskKey {
        TaskKey::child(
            TaskName::new("sync_job"),
            TaskId::new("root1"),
            TaskId::new("abc"),
        )
    }

    fn abc_args() -> Arguments {
        args(json!({ "task_id": "abc", "parent_task_id": "root1", "job_id": 7 }))
    }

    #[derive(Clone, Copy)]
    enum Step {
        Pending,
        Fail,
    }

    /// Replays `steps` in order, then succeeds.
    fn scripted(steps: &'static [Step]) -> impl UnitOfWork {
        let calls = Arc::new(AtomicUsize::new(0));
        work_fn(move |_ctx, _args| {
            let step = steps.get(calls.fetch_add(1, Ordering::SeqCst)).copied();
            async move {
                match step {
                    Some(Step::Pending) => Err(TaskError::NotFinished),
                    Some(Step::Fail) => Err(TaskError::failed("jenkins returned 502")),
                    None => Ok(()),
                }
            }
        })
    }

    #[tokio::test]
    async fn not_finished_then_success() {
        let fx = Fixture::new(TaskPolicy::default());
        let task = fx.task("sync_job", scripted(&[Step::Pending]));

        let outcome = task.invoke(abc_args()).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::NotFinished);

        let record = fx.record(&abc_key()).await;
        assert_eq!(record.status, Status::InProgress);
        assert_eq!(record.num_retries, 0);

        let history = fx.queue.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].delay, Duration::from_secs(5));
        assert_eq!(history[0].invocation.arguments, abc_args());

        fx.clock.advance(Duration::from_secs(5));
        let outcome = task
            .invoke(history[0].invocation.arguments.clone())
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Succeeded);

        let record = fx.record(&abc_key()).await;
        assert_eq!(record.status, Status::Finished);
        assert_eq!(record.result, TaskResult::Success);
        assert_eq!(record.num_retries, 0);
        assert_eq!(record.date_started, Some(fx.clock.now()));
        assert_eq!(record.date_finished, Some(fx.clock.now()));
        assert_eq!(fx.queue.history().await.len(), 1);
    }

    #[tokio::test]
    async fn failure_retries_once_then_finishes() {
        let fx = Fixture::new(TaskPolicy::default());
        let task = fx.task("sync_job", scripted(&[Step::Fail]));

        let outcome = task.invoke(abc_args()).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::RetryScheduled { num_retries: 1 });

        let history = fx.queue.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].delay, Duration::from_secs(60));

        let record = fx.record(&abc_key()).await;
        assert_eq!(record.status, Status::InProgress);
        assert_eq!(record.num_retries, 1);

        let outcome = task.invoke(abc_args()).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Succeeded);

        let record = fx.record(&abc_key()).await;
        assert_eq!(record.status, Status::Finished);
        assert_eq!(record.num_retries, 1);
        assert_eq!(fx.queue.history().await.len(), 1);
    }

    #[tokio::test]
    async fn replay_after_finish_is_a_no_op() {
        let fx = Fixture::new(TaskPolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let task = fx.task("sync_job", {
            let calls = Arc::clone(&calls);
            work_fn(move |_ctx, _args| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
        });

        assert_eq!(task.invoke(abc_args()).await.unwrap(), AttemptOutcome::Succeeded);
        let finished = fx.record(&abc_key()).await;

        fx.clock.advance(Duration::from_secs(30));
        assert_eq!(task.invoke(abc_args()).await.unwrap(), AttemptOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.record(&abc_key()).await, finished);
    }

    #[tokio::test]
    async fn missing_task_id_runs_untracked() {
        let fx = Fixture::new(TaskPolicy::default());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let task = fx.task("sync_job", {
            let seen = Arc::clone(&seen);
            work_fn(move |ctx, args| {
                *seen.lock().unwrap() = Some((ctx.task_id().cloned(), args));
                async { Err(TaskError::failed("ignored")) }
            })
        });

        let outcome = task
            .invoke(args(json!({ "parent_task_id": "root1", "job_id": 7 })))
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Untracked);
        assert!(fx.store.is_empty().await);
        assert!(fx.queue.history().await.is_empty());

        let (task_id, arguments) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(task_id, None);
        assert_eq!(arguments, args(json!({ "job_id": 7 })));
    }

    #[tokio::test]
    async fn unit_of_work_sees_identity_in_context_only() {
        let fx = Fixture::new(TaskPolicy::default());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let task = fx.task("sync_job", {
            let seen = Arc::clone(&seen);
            work_fn(move |ctx, args| {
                *seen.lock().unwrap() =
                    Some((ctx.task_id().cloned(), ctx.parent_id().cloned(), args));
                async { Ok(()) }
            })
        });

        task.invoke(abc_args()).await.unwrap();

        let (task_id, parent_id, arguments) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(task_id, Some(TaskId::new("abc")));
        assert_eq!(parent_id, Some(TaskId::new("root1")));
        assert_eq!(arguments, args(json!({ "job_id": 7 })));
    }

    #[tokio::test]
    async fn retry_ceiling_dead_letters() {
        let fx = Fixture::new(TaskPolicy {
            max_retries: Some(1),
            ..TaskPolicy::default()
        });
        let task = fx.task("sync_job", scripted(&[Step::Fail, Step::Fail, Step::Fail]));

        assert_eq!(
            task.invoke(abc_args()).await.unwrap(),
            AttemptOutcome::RetryScheduled { num_retries: 1 }
        );
        assert_eq!(
            task.invoke(abc_args()).await.unwrap(),
            AttemptOutcome::DeadLettered { num_retries: 1 }
        );

        let record = fx.record(&abc_key()).await;
        assert_eq!(record.status, Status::Finished);
        assert_eq!(record.result, TaskResult::Failure);
        assert_eq!(record.num_retries, 1);
        assert_eq!(fx.queue.history().await.len(), 1);
    }

    /// Fails every write that would finish a task as failed.
    struct DeadLetterFailingStore(InMemoryTaskStore);

    #[async_trait]
    impl TaskStore for DeadLetterFailingStore {
        async fn find_or_create(
            &self,
            key: &TaskKey,
            defaults: NewTask,
        ) -> Result<(crate::domain::TaskRecord, bool), StoreError> {
            self.0.find_or_create(key, defaults).await
        }

        async fn create_if_absent(
            &self,
            key: &TaskKey,
            fields: NewTask,
        ) -> Result<Option<crate::domain::TaskRecord>, StoreError> {
            self.0.create_if_absent(key, fields).await
        }

        async fn update_where(
            &self,
            filter: &TaskFilter,
            update: &TaskUpdate,
        ) -> Result<u64, StoreError> {
            if update.result == Some(TaskResult::Failure) {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.0.update_where(filter, update).await
        }

        async fn query(
            &self,
            filter: &TaskFilter,
        ) -> Result<Vec<crate::domain::TaskRecord>, StoreError> {
            self.0.query(filter).await
        }
    }

    #[tokio::test]
    async fn failed_dead_letter_write_still_reschedules() {
        let fx = Fixture::new(TaskPolicy {
            max_retries: Some(0),
            ..TaskPolicy::default()
        });
        let store = Arc::new(DeadLetterFailingStore(InMemoryTaskStore::new()));
        let services = TaskServices {
            store: store.clone(),
            ..fx.services.clone()
        };
        let task = TrackedTask::new(
            TaskName::new("sync_job"),
            Arc::new(scripted(&[Step::Fail])),
            services,
        );

        assert_eq!(
            task.invoke(abc_args()).await.unwrap(),
            AttemptOutcome::RetryScheduled { num_retries: 1 }
        );

        let record = store.get(&abc_key()).await.unwrap().unwrap();
        assert_eq!(record.status, Status::InProgress);
        assert_eq!(record.num_retries, 1);

        let history = fx.queue.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].delay, Duration::from_secs(60));
    }

    struct RejectingQueue;

    #[async_trait]
    impl WorkQueue for RejectingQueue {
        async fn enqueue(
            &self,
            _task_name: &TaskName,
            _arguments: Arguments,
            _delay: Duration,
        ) -> Result<(), QueueError> {
            Err(QueueError::OperationFailed("broker unreachable".into()))
        }
    }

    #[tokio::test]
    async fn retry_scheduling_failure_propagates() {
        let fx = Fixture::new(TaskPolicy::default());
        let services = TaskServices {
            queue: Arc::new(RejectingQueue),
            ..fx.services.clone()
        };
        let task = TrackedTask::new(
            TaskName::new("sync_job"),
            Arc::new(scripted(&[Step::Fail])),
            services,
        );

        let err = task.invoke(abc_args()).await.unwrap_err();
        assert!(matches!(err, RelayError::Queue(QueueError::OperationFailed(_))));
        assert_eq!(fx.record(&abc_key()).await.num_retries, 1);
    }

    #[tokio::test]
    async fn concurrent_finish_is_not_overwritten() {
        let fx = Fixture::new(TaskPolicy::default());
        let store = Arc::clone(&fx.store);
        let clock = Arc::clone(&fx.clock);
        let task = fx.task(
            "sync_job",
            work_fn(move |_ctx, _args| {
                let store = Arc::clone(&store);
                let now = clock.now();
                async move {
                    // another worker finishes the same task mid-attempt
                    store
                        .update_where(
                            &TaskFilter::key(&abc_key()),
                            &TaskUpdate::touch(now)
                                .status(Status::Finished)
                                .result(TaskResult::Success),
                        )
                        .await
                        .unwrap();
                    Err(TaskError::NotFinished)
                }
            }),
        );

        assert_eq!(task.invoke(abc_args()).await.unwrap(), AttemptOutcome::Skipped);
        assert_eq!(fx.record(&abc_key()).await.status, Status::Finished);
        assert!(fx.queue.history().await.is_empty());
    }

    #[tokio::test]
    async fn invocations_of_one_runner_are_serialized() {
        let fx = Fixture::new(TaskPolicy::default());
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(fx.task("sync_job", {
            let running = Arc::clone(&running);
            let overlap = Arc::clone(&overlap);
            work_fn(move |_ctx, _args| {
                let running = Arc::clone(&running);
                let overlap = Arc::clone(&overlap);
                async move {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        }));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let task = Arc::clone(&task);
                tokio::spawn(async move {
                    task.invoke(args(json!({ "task_id": format!("t{i}") }))).await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), AttemptOutcome::Succeeded);
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert_eq!(fx.store.len().await, 8);
    }

    fn noop() -> impl UnitOfWork {
        work_fn(|_ctx, _args| async { Ok(()) })
    }

    #[tokio::test]
    async fn delay_records_and_enqueues() {
        let fx = Fixture::new(TaskPolicy::default());
        let task = fx.task("sync_job", noop());

        task.delay(abc_args()).await.unwrap();
        let record = fx.record(&abc_key()).await;
        assert_eq!(record.status, Status::Queued);
        assert_eq!(record.arguments, Some(args(json!({ "job_id": 7 }))));

        task.delay(args(json!({ "task_id": "abc", "parent_task_id": "root1", "job_id": 8 })))
            .await
            .unwrap();
        let record = fx.record(&abc_key()).await;
        assert_eq!(record.arguments, Some(args(json!({ "job_id": 8 }))));
        assert_eq!(fx.store.len().await, 1);

        let history = fx.queue.history().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.delay == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn delay_requires_task_id() {
        let fx = Fixture::new(TaskPolicy::default());
        let task = fx.task("sync_job", noop());

        let err = task.delay(args(json!({ "job_id": 7 }))).await.unwrap_err();
        assert!(matches!(err, RelayError::MissingTaskId(name) if name.as_str() == "sync_job"));
        let err = task.delay_if_needed(args(json!({}))).await.unwrap_err();
        assert!(matches!(err, RelayError::MissingTaskId(_)));
    }

    #[tokio::test]
    async fn delay_if_needed_collapses_fresh_duplicates() {
        let fx = Fixture::new(TaskPolicy::default());
        let task = fx.task("sync_job", noop());

        assert!(task.delay_if_needed(abc_args()).await.unwrap());
        fx.clock.advance(Duration::from_secs(60));
        assert!(!task.delay_if_needed(abc_args()).await.unwrap());
        assert_eq!(fx.queue.history().await.len(), 1);
    }

    #[tokio::test]
    async fn delay_if_needed_rescues_stale_tasks() {
        let fx = Fixture::new(TaskPolicy::default());
        let task = fx.task("sync_job", noop());

        assert!(task.delay_if_needed(abc_args()).await.unwrap());
        fx.clock.advance(Duration::from_secs(6 * 60));
        assert!(task.delay_if_needed(abc_args()).await.unwrap());
        assert_eq!(fx.record(&abc_key()).await.date_modified, fx.clock.now());
        // the rescue refreshed the row
        assert!(!task.delay_if_needed(abc_args()).await.unwrap());
        assert_eq!(fx.queue.history().await.len(), 2);
    }

    #[tokio::test]
    async fn delay_if_needed_never_requeues_finished_tasks() {
        let fx = Fixture::new(TaskPolicy::default());
        let task = fx.task("sync_job", noop());

        task.invoke(abc_args()).await.unwrap();
        fx.clock.set(fx.clock.now() + TimeDelta::hours(2));
        assert!(!task.delay_if_needed(abc_args()).await.unwrap());
        assert!(fx.queue.history().await.is_empty());
    }
}
