//! TaskStore port - タスク台帳の正本（source of truth）
//!
//! # 設計原則
//! - `(task_name, parent_id, task_id)` が一意キー。作成の競合はストアが解決する
//! - 各操作はそれ自体で atomic かつ永続（auto-commit）
//! - `update_where` は一括更新。既に返したスナップショットは更新しない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Arguments, NewTask, Status, TaskId, TaskKey, TaskName, TaskRecord, TaskResult};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("arguments encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Row selector. Every criterion that is set must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub task_name: Option<TaskName>,

    /// `Some(None)` selects root tasks.
    pub parent_id: Option<Option<TaskId>>,

    pub task_ids: Option<Vec<TaskId>>,

    /// Skip finished rows.
    pub unfinished_only: bool,
}

impl TaskFilter {
    /// Exactly one row (if it exists).
    pub fn key(key: &TaskKey) -> Self {
        Self {
            task_name: Some(key.task_name.clone()),
            parent_id: Some(key.parent_id.clone()),
            task_ids: Some(vec![key.task_id.clone()]),
            unfinished_only: false,
        }
    }

    /// All children of `parent_id`, whatever their name.
    pub fn children_of(parent_id: &TaskId) -> Self {
        Self {
            parent_id: Some(Some(parent_id.clone())),
            ..Self::default()
        }
    }

    pub fn named(mut self, task_name: &TaskName) -> Self {
        self.task_name = Some(task_name.clone());
        self
    }

    pub fn ids<I>(mut self, task_ids: I) -> Self
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.task_ids = Some(task_ids.into_iter().collect());
        self
    }

    pub fn unfinished(mut self) -> Self {
        self.unfinished_only = true;
        self
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        if let Some(name) = &self.task_name
            && name != &record.key.task_name
        {
            return false;
        }
        if let Some(parent) = &self.parent_id
            && parent != &record.key.parent_id
        {
            return false;
        }
        if let Some(ids) = &self.task_ids
            && !ids.contains(&record.key.task_id)
        {
            return false;
        }
        !(self.unfinished_only && record.status.is_finished())
    }
}

/// Column assignments for [`TaskStore::update_where`]. Unset fields are left
/// alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<Status>,
    pub result: Option<TaskResult>,
    pub date_modified: Option<DateTime<Utc>>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_finished: Option<DateTime<Utc>>,

    /// `num_retries = num_retries + 1`, evaluated by the store.
    pub increment_retries: bool,

    pub arguments: Option<Arguments>,
}

impl TaskUpdate {
    /// Only advances `date_modified`.
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            date_modified: Some(now),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn result(mut self, result: TaskResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn started(mut self, at: DateTime<Utc>) -> Self {
        self.date_started = Some(at);
        self
    }

    pub fn finished(mut self, at: DateTime<Utc>) -> Self {
        self.date_finished = Some(at);
        self
    }

    pub fn increment_retries(mut self) -> Self {
        self.increment_retries = true;
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn apply(&self, record: &mut TaskRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(result) = self.result {
            record.result = result;
        }
        if let Some(at) = self.date_modified {
            record.date_modified = at;
        }
        if let Some(at) = self.date_started {
            record.date_started = Some(at);
        }
        if let Some(at) = self.date_finished {
            record.date_finished = Some(at);
        }
        if self.increment_retries {
            record.num_retries = record.num_retries.saturating_add(1);
        }
        if let Some(arguments) = &self.arguments {
            record.arguments = Some(arguments.clone());
        }
    }
}

/// Persistent, key-indexed task ledger.
///
/// # Concurrency
/// Several worker processes may act on the same row at once. Creation races
/// are settled by the unique key: for a given key, exactly one caller of
/// `find_or_create`/`create_if_absent` observes `created`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Returns the row for `key`, creating it from `defaults` when absent.
    /// The flag is true when this call created it.
    async fn find_or_create(
        &self,
        key: &TaskKey,
        defaults: NewTask,
    ) -> Result<(TaskRecord, bool), StoreError>;

    /// Creates the row unless it exists. `None` means someone else owns it.
    async fn create_if_absent(
        &self,
        key: &TaskKey,
        fields: NewTask,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Bulk conditional update; returns the number of rows changed.
    ///
    /// Runs without reading rows into memory first, so snapshots previously
    /// returned by this store keep their old values.
    async fn update_where(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<u64, StoreError>;

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;

    async fn get(&self, key: &TaskKey) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.query(&TaskFilter::key(key)).await?.into_iter().next())
    }
}
