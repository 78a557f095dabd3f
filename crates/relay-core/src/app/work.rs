use std::future::Future;

use async_trait::async_trait;

use super::context::TaskContext;
use crate::domain::{Arguments, TaskError};

/// A unit of work wrapped by a [`super::TrackedTask`].
///
/// Three outcomes:
/// - `Ok(())`: the attempt succeeded.
/// - `Err(TaskError::NotFinished)`: call me again later with the same
///   arguments.
/// - `Err(TaskError::Failed(_))`: the attempt failed; retry.
///
/// `arguments` never contain the identity keys; read them from `ctx`.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run(&self, ctx: TaskContext, arguments: Arguments) -> Result<(), TaskError>;
}

/// Closure adapter, see [`work_fn`].
pub struct FnWork<F> {
    f: F,
}

/// Wraps an async closure as a [`UnitOfWork`].
///
/// ```ignore
/// let work = work_fn(|ctx, args| async move {
///     sync_job(&ctx, args).await
/// });
/// ```
pub fn work_fn<F, Fut>(f: F) -> FnWork<F>
where
    F: Fn(TaskContext, Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    FnWork { f }
}

#[async_trait]
impl<F, Fut> UnitOfWork for FnWork<F>
where
    F: Fn(TaskContext, Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext, arguments: Arguments) -> Result<(), TaskError> {
        (self.f)(ctx, arguments).await
    }
}
