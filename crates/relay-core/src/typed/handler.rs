//! Handler trait - Task を実行する Handler の定義
//!
//! # 二層構造
//! - `Handler<T>`: 型付き（`T` しか受け取れない）
//! - `TypedWork<T, H>`: arguments を `T` に decode して `UnitOfWork` として振る舞う

use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::decode;
use super::task::Task;
use crate::app::{TaskContext, UnitOfWork};
use crate::domain::{Arguments, TaskError};

/// # 使用例
/// ```ignore
/// struct SyncJobHandler;
///
/// #[async_trait]
/// impl Handler<SyncJob> for SyncJobHandler {
///     async fn handle(&self, ctx: TaskContext, job: SyncJob) -> Result<(), TaskError> {
///         if !jenkins.is_done(&job.job_id).await? {
///             return Err(TaskError::NotFinished);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: TaskContext, task: T) -> Result<(), TaskError>;
}

pub struct TypedWork<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedWork<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> UnitOfWork for TypedWork<T, H> {
    /// A decode failure is an ordinary failed attempt.
    async fn run(&self, ctx: TaskContext, arguments: Arguments) -> Result<(), TaskError> {
        let task: T = decode(arguments).map_err(TaskError::failed)?;
        self.handler.handle(ctx, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{TaskPolicy, TaskServices};
    use crate::domain::TaskName;
    use crate::impls::{InMemoryTaskStore, InMemoryWorkQueue};
    use crate::ports::SystemClock;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize)]
    struct SyncJob {
        job_id: String,
    }

    impl Task for SyncJob {
        const NAME: &'static str = "sync_job";
    }

    struct PendingUntilDone;

    #[async_trait]
    impl Handler<SyncJob> for PendingUntilDone {
        async fn handle(&self, _ctx: TaskContext, job: SyncJob) -> Result<(), TaskError> {
            if job.job_id == "done" {
                Ok(())
            } else {
                Err(TaskError::NotFinished)
            }
        }
    }

    fn ctx() -> TaskContext {
        let services = TaskServices::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryWorkQueue::new()),
            Arc::new(SystemClock),
            TaskPolicy::default(),
        );
        TaskContext::untracked(TaskName::new(SyncJob::NAME), services)
    }

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn typed_work_decodes_and_delegates() {
        let work = TypedWork::<SyncJob, _>::new(PendingUntilDone);

        assert!(work.run(ctx(), args(json!({ "job_id": "done" }))).await.is_ok());
        let err = work
            .run(ctx(), args(json!({ "job_id": "running" })))
            .await
            .unwrap_err();
        assert!(err.is_not_finished());
    }

    #[tokio::test]
    async fn undecodable_arguments_fail_the_attempt() {
        let work = TypedWork::<SyncJob, _>::new(PendingUntilDone);
        let err = work.run(ctx(), args(json!({ "job": 1 }))).await.unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
    }
}
