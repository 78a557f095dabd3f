//! Task と arguments の相互変換

use serde_json::Value;
use thiserror::Error;

use super::task::Task;
use crate::domain::invocation::with_identity;
use crate::domain::{Arguments, TaskError, TaskId};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("task {0} must serialize to a JSON object")]
    NotAnObject(&'static str),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CodecError> for TaskError {
    fn from(error: CodecError) -> Self {
        TaskError::failed(error)
    }
}

pub fn encode<T: Task>(task: &T) -> Result<Arguments, CodecError> {
    match serde_json::to_value(task)? {
        Value::Object(arguments) => Ok(arguments),
        _ => Err(CodecError::NotAnObject(T::NAME)),
    }
}

/// Arguments of a tracked invocation of `task`, identity included.
pub fn encode_tracked<T: Task>(
    task: &T,
    task_id: &TaskId,
    parent_id: Option<&TaskId>,
) -> Result<Arguments, CodecError> {
    Ok(with_identity(encode(task)?, task_id, parent_id))
}

pub fn decode<T: Task>(arguments: Arguments) -> Result<T, CodecError> {
    Ok(serde_json::from_value(Value::Object(arguments))?)
}
