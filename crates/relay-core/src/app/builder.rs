//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - expect_tasks() で期待される task name を登録
//! - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば BuildError を返す

use std::sync::Arc;

use tracing::warn;

use super::context::TaskServices;
use super::registry::TaskRegistry;
use super::runner::TrackedTask;
use super::work::UnitOfWork;
use crate::domain::{Arguments, AttemptOutcome, Invocation, TaskName};
use crate::error::RelayError;
use crate::typed::{Handler, Task, TypedWork};

/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(services)
///     .task("sync_build", work_fn(sync_build))?
///     .typed::<SyncJob, _>(SyncJobHandler)?
///     .expect_tasks(&["sync_build", "sync_job"])
///     .build()?;
/// ```
pub struct AppBuilder {
    services: TaskServices,
    registry: TaskRegistry,
    expected_tasks: Option<Vec<TaskName>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing tasks: {0:?}. These tasks were expected but not registered.")]
    MissingTasks(Vec<String>),
}

impl AppBuilder {
    pub fn new(services: TaskServices) -> Self {
        Self {
            services,
            registry: TaskRegistry::new(),
            expected_tasks: None,
        }
    }

    /// Registers an untyped unit of work under `name`.
    pub fn task<W: UnitOfWork + 'static>(
        self,
        name: impl Into<String>,
        work: W,
    ) -> Result<Self, RelayError> {
        self.register(TaskName::new(name), Arc::new(work))
    }

    /// Registers a typed handler under `T::NAME`.
    pub fn typed<T: Task, H: Handler<T> + 'static>(self, handler: H) -> Result<Self, RelayError> {
        self.register(T::task_name(), Arc::new(TypedWork::<T, H>::new(handler)))
    }

    fn register(mut self, name: TaskName, work: Arc<dyn UnitOfWork>) -> Result<Self, RelayError> {
        let runner = TrackedTask::new(name, work, self.services.clone());
        self.registry.register(runner)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|&name| TaskName::new(name)).collect());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !self.registry.contains(name))
                .map(|name| name.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTasks(missing));
            }
        }
        Ok(App {
            services: self.services,
            registry: self.registry,
        })
    }
}

/// Registered runners plus the services they share.
pub struct App {
    services: TaskServices,
    registry: TaskRegistry,
}

impl App {
    pub fn services(&self) -> &TaskServices {
        &self.services
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn runner(&self, name: &TaskName) -> Result<&Arc<TrackedTask>, RelayError> {
        self.registry
            .get(name)
            .ok_or_else(|| RelayError::TaskNotFound(name.clone()))
    }

    /// Runs one dequeued invocation through its runner.
    pub async fn dispatch(&self, invocation: Invocation) -> Result<AttemptOutcome, RelayError> {
        let runner = match self.runner(&invocation.task_name) {
            Ok(runner) => runner,
            Err(err) => {
                warn!(task_name = %invocation.task_name, "no runner registered, dropping invocation");
                return Err(err);
            }
        };
        runner.invoke(invocation.arguments).await
    }

    pub async fn delay(&self, name: &TaskName, arguments: Arguments) -> Result<(), RelayError> {
        self.runner(name)?.delay(arguments).await
    }

    pub async fn delay_if_needed(
        &self,
        name: &TaskName,
        arguments: Arguments,
    ) -> Result<bool, RelayError> {
        self.runner(name)?.delay_if_needed(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{TaskContext, TaskPolicy, work_fn};
    use crate::domain::{TaskError, TaskId, TaskKey, TaskResult};
    use crate::impls::{InMemoryTaskStore, InMemoryWorkQueue};
    use crate::ports::{SystemClock, TaskStore};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct SyncArtifact {
        artifact_id: String,
    }

    impl Task for SyncArtifact {
        const NAME: &'static str = "sync_artifact";
    }

    struct SyncArtifactHandler;

    #[async_trait]
    impl Handler<SyncArtifact> for SyncArtifactHandler {
        async fn handle(&self, _ctx: TaskContext, _task: SyncArtifact) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn services(store: Arc<InMemoryTaskStore>) -> TaskServices {
        TaskServices::new(
            store,
            Arc::new(InMemoryWorkQueue::new()),
            Arc::new(SystemClock),
            TaskPolicy::default(),
        )
    }

    fn builder() -> AppBuilder {
        AppBuilder::new(services(Arc::new(InMemoryTaskStore::new())))
            .task("sync_job", work_fn(|_ctx, _args| async { Ok(()) }))
            .unwrap()
    }

    #[test]
    fn build_success() {
        let app = builder()
            .typed::<SyncArtifact, _>(SyncArtifactHandler)
            .unwrap()
            .expect_tasks(&["sync_job", SyncArtifact::NAME])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_missing_tasks() {
        let app = builder().expect_tasks(&["sync_job", "sync_build"]).build();
        assert!(matches!(
            app,
            Err(BuildError::MissingTasks(missing)) if missing == vec!["sync_build".to_string()]
        ));
    }

    #[test]
    fn build_without_expectations() {
        assert!(builder().build().is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = builder().task("sync_job", work_fn(|_ctx, _args| async { Ok(()) }));
        assert!(matches!(result, Err(RelayError::DuplicateTask(_))));
    }

    #[tokio::test]
    async fn dispatch_routes_by_task_name() {
        let store = Arc::new(InMemoryTaskStore::new());
        let app = AppBuilder::new(services(store.clone()))
            .typed::<SyncArtifact, _>(SyncArtifactHandler)
            .unwrap()
            .build()
            .unwrap();

        let arguments = json!({ "task_id": "art1", "artifact_id": "junit.xml" })
            .as_object()
            .cloned()
            .unwrap();
        let outcome = app
            .dispatch(Invocation::new(TaskName::new("sync_artifact"), arguments))
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Succeeded);

        let key = TaskKey::root(TaskName::new("sync_artifact"), TaskId::new("art1"));
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.result, TaskResult::Success);
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_names() {
        let app = builder().build().unwrap();
        let err = app
            .dispatch(Invocation::new(TaskName::new("nope"), Arguments::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::TaskNotFound(name) if name.as_str() == "nope"));
    }
}
