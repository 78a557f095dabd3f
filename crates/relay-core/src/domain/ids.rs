//! Domain identifiers.
//!
//! Task ids are opaque strings. Producers usually mint them from a ULID
//! (see [`crate::ports::IdGenerator`]), but build orchestration code also
//! reuses existing entity ids (job ids, step ids) as child task ids, so no
//! format is enforced here.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identity of one logical task within its `(task_name, parent_id)` scope.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// ULID から TaskId を作成（小文字の 26 文字表現）
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
