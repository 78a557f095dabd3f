use thiserror::Error;

use crate::domain::TaskName;
use crate::ports::{QueueError, StoreError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("task store: {0}")]
    Store(#[from] StoreError),

    #[error("work queue: {0}")]
    Queue(#[from] QueueError),

    #[error("missing task_id for task={0}")]
    MissingTaskId(TaskName),

    #[error("no runner registered for task={0}")]
    TaskNotFound(TaskName),

    #[error("duplicate runner for task={0}")]
    DuplicateTask(TaskName),

    #[error("arguments: {0}")]
    Arguments(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
