//! SqliteTaskStore - sqlx による永続台帳
//!
//! The natural key is the table's primary key. SQLite treats NULLs as
//! distinct inside unique constraints, so root tasks are stored with
//! `parent_id = ''` instead of NULL; that keeps the constraint meaningful
//! for them too.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::domain::{Arguments, NewTask, Status, TaskId, TaskKey, TaskName, TaskRecord, TaskResult};
use crate::ports::{StoreError, TaskFilter, TaskStore, TaskUpdate};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS task (
    task_name     TEXT    NOT NULL,
    parent_id     TEXT    NOT NULL DEFAULT '',
    task_id       TEXT    NOT NULL,
    status        TEXT    NOT NULL,
    result        TEXT    NOT NULL,
    num_retries   INTEGER NOT NULL DEFAULT 0,
    arguments     TEXT,
    date_created  TEXT    NOT NULL,
    date_modified TEXT    NOT NULL,
    date_started  TEXT,
    date_finished TEXT,
    PRIMARY KEY (task_name, parent_id, task_id)
);
CREATE INDEX IF NOT EXISTS idx_task_parent_id ON task (parent_id);
"#;

const COLUMNS: &str = "task_name, parent_id, task_id, status, result, num_retries, arguments, \
                       date_created, date_modified, date_started, date_finished";

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `url` and applies the
    /// schema. `sqlite::memory:` gets a single long-lived connection, since
    /// every in-memory connection is its own database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let store = Self::new(pool_options.connect_with(options).await?);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_ignoring_conflict(
        &self,
        key: &TaskKey,
        fields: &NewTask,
    ) -> Result<bool, StoreError> {
        let arguments = fields
            .arguments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO task (task_name, parent_id, task_id, status, result, num_retries,
                              arguments, date_created, date_modified)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            ON CONFLICT (task_name, parent_id, task_id) DO NOTHING
            "#,
        )
        .bind(key.task_name.as_str())
        .bind(parent_column(key.parent_id.as_ref()))
        .bind(key.task_id.as_str())
        .bind(fields.status.as_str())
        .bind(TaskResult::Unknown.as_str())
        .bind(arguments)
        .bind(fields.now)
        .bind(fields.now)
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn fetch_existing(&self, key: &TaskKey) -> Result<TaskRecord, StoreError> {
        self.get(key).await?.ok_or_else(|| {
            StoreError::Corrupt(format!(
                "row {}/{}/{} vanished after insert",
                key.task_name,
                parent_column(key.parent_id.as_ref()),
                key.task_id
            ))
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, defaults), fields(task_name = %key.task_name, task_id = %key.task_id))]
    async fn find_or_create(
        &self,
        key: &TaskKey,
        defaults: NewTask,
    ) -> Result<(TaskRecord, bool), StoreError> {
        let created = self.insert_ignoring_conflict(key, &defaults).await?;
        let record = self.fetch_existing(key).await?;
        debug!(created, status = %record.status, "find_or_create");
        Ok((record, created))
    }

    #[instrument(skip(self, fields), fields(task_name = %key.task_name, task_id = %key.task_id))]
    async fn create_if_absent(
        &self,
        key: &TaskKey,
        fields: NewTask,
    ) -> Result<Option<TaskRecord>, StoreError> {
        if !self.insert_ignoring_conflict(key, &fields).await? {
            return Ok(None);
        }
        Ok(Some(self.fetch_existing(key).await?))
    }

    #[instrument(skip(self, filter, update))]
    async fn update_where(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<u64, StoreError> {
        let arguments = update
            .arguments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE task SET ");
        let mut assignments = 0;
        {
            let mut set = qb.separated(", ");
            if let Some(status) = update.status {
                set.push("status = ").push_bind_unseparated(status.as_str());
                assignments += 1;
            }
            if let Some(result) = update.result {
                set.push("result = ").push_bind_unseparated(result.as_str());
                assignments += 1;
            }
            if let Some(at) = update.date_modified {
                set.push("date_modified = ").push_bind_unseparated(at);
                assignments += 1;
            }
            if let Some(at) = update.date_started {
                set.push("date_started = ").push_bind_unseparated(at);
                assignments += 1;
            }
            if let Some(at) = update.date_finished {
                set.push("date_finished = ").push_bind_unseparated(at);
                assignments += 1;
            }
            if update.increment_retries {
                set.push("num_retries = num_retries + 1");
                assignments += 1;
            }
            if let Some(arguments) = arguments {
                set.push("arguments = ").push_bind_unseparated(arguments);
                assignments += 1;
            }
        }
        if assignments == 0 {
            return Ok(0);
        }
        push_where(&mut qb, filter);

        let done = qb.build().execute(&self.pool).await?;
        debug!(rows = done.rows_affected(), "update_where");
        Ok(done.rows_affected())
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM task"));
        push_where(&mut qb, filter);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

fn parent_column(parent_id: Option<&TaskId>) -> String {
    parent_id.map(|p| p.as_str().to_string()).unwrap_or_default()
}

fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(name) = &filter.task_name {
        qb.push(" AND task_name = ").push_bind(name.as_str().to_string());
    }
    if let Some(parent) = &filter.parent_id {
        qb.push(" AND parent_id = ").push_bind(parent_column(parent.as_ref()));
    }
    if let Some(ids) = &filter.task_ids {
        if ids.is_empty() {
            qb.push(" AND 0 = 1");
        } else {
            qb.push(" AND task_id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(id.as_str().to_string());
            }
            list.push_unseparated(")");
        }
    }
    if filter.unfinished_only {
        qb.push(" AND status != ").push_bind(Status::Finished.as_str());
    }
}

fn row_to_record(row: &SqliteRow) -> Result<TaskRecord, StoreError> {
    let parent_id: String = row.try_get("parent_id")?;
    let status: String = row.try_get("status")?;
    let result: String = row.try_get("result")?;
    let num_retries: i64 = row.try_get("num_retries")?;
    let arguments: Option<String> = row.try_get("arguments")?;

    Ok(TaskRecord {
        key: TaskKey::new(
            TaskName::new(row.try_get::<String, _>("task_name")?),
            (!parent_id.is_empty()).then(|| TaskId::new(parent_id)),
            TaskId::new(row.try_get::<String, _>("task_id")?),
        ),
        status: status
            .parse()
            .map_err(|e: crate::domain::ParseStateError| StoreError::Corrupt(e.to_string()))?,
        result: result
            .parse()
            .map_err(|e: crate::domain::ParseStateError| StoreError::Corrupt(e.to_string()))?,
        num_retries: u32::try_from(num_retries)
            .map_err(|_| StoreError::Corrupt(format!("num_retries out of range: {num_retries}")))?,
        arguments: arguments
            .map(|raw| serde_json::from_str::<Arguments>(&raw))
            .transpose()?,
        date_created: row.try_get::<DateTime<Utc>, _>("date_created")?,
        date_modified: row.try_get::<DateTime<Utc>, _>("date_modified")?,
        date_started: row.try_get::<Option<DateTime<Utc>>, _>("date_started")?,
        date_finished: row.try_get::<Option<DateTime<Utc>>, _>("date_finished")?,
    })
}
