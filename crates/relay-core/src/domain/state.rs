//! Task status and result.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a ledger row.
///
/// State transitions:
/// - Queued -> InProgress -> Finished
/// - Queued -> Finished (succeeded on the first attempt, or expired by a parent)
///
/// A row never moves backwards; every runner write is conditional on the row
/// not being finished yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, waiting for its first attempt.
    Queued,

    /// At least one attempt ran and asked to be called again (or failed and
    /// was scheduled for retry).
    InProgress,

    /// Terminal.
    Finished,
}

impl Status {
    pub fn is_finished(self) -> bool {
        matches!(self, Status::Finished)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::InProgress => "in_progress",
            Status::Finished => "finished",
        }
    }
}

/// Outcome recorded on a finished row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    Unknown,
    /// Force-finished by a parent after going silent past the expiry window.
    Aborted,
    Success,
    /// Retry budget exhausted.
    Failure,
}

impl TaskResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskResult::Unknown => "unknown",
            TaskResult::Aborted => "aborted",
            TaskResult::Success => "success",
            TaskResult::Failure => "failure",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseStateError {
    kind: &'static str,
    value: String,
}

impl FromStr for Status {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Status::Queued),
            "in_progress" => Ok(Status::InProgress),
            "finished" => Ok(Status::Finished),
            other => Err(ParseStateError {
                kind: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for TaskResult {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(TaskResult::Unknown),
            "aborted" => Ok(TaskResult::Aborted),
            "success" => Ok(TaskResult::Success),
            "failure" => Ok(TaskResult::Failure),
            other => Err(ParseStateError {
                kind: "result",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
