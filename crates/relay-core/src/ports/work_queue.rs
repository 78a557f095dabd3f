//! WorkQueue port - 遅延付きの配送キュー
//!
//! The queue carries whole invocations (task name + arguments). It is
//! fire-and-forget from the protocol's point of view: nothing is read back
//! after `enqueue` returns.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Arguments, Invocation, TaskName};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

/// Producer side: schedule a named invocation, optionally after a delay.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// `Duration::ZERO` means "ready now".
    async fn enqueue(
        &self,
        task_name: &TaskName,
        arguments: Arguments,
        delay: Duration,
    ) -> Result<(), QueueError>;
}

/// Consumer side: what a worker pulls from.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Waits for the next ready invocation. `None` once the source is closed
    /// and drained of ready work.
    async fn next(&self) -> Option<Invocation>;
}
