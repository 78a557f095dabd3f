//! Errors raised by a unit of work.
//!
//! # 分類
//! - NotFinished: まだ終わっていない（短い間隔で再投入、リトライ回数に数えない）
//! - Failed: 一時的な失敗（長い間隔でリトライ、num_retries を加算）

use thiserror::Error;

/// What a unit of work reports instead of a normal return.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Re-invoke me later with the same arguments.
    #[error("task not finished")]
    NotFinished,

    /// The attempt failed; the runner schedules a retry.
    #[error("task failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        TaskError::Failed(error.into())
    }

    pub fn is_not_finished(&self) -> bool {
        matches!(self, TaskError::NotFinished)
    }
}

impl From<crate::error::RelayError> for TaskError {
    fn from(error: crate::error::RelayError) -> Self {
        TaskError::Failed(Box::new(error))
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(error: serde_json::Error) -> Self {
        TaskError::Failed(Box::new(error))
    }
}
