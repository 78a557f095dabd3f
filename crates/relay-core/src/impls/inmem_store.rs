//! InMemoryTaskStore - 開発・テスト用の台帳
//!
//! # 実装詳細
//! - HashMap<TaskKey, TaskRecord> を tokio Mutex で保護
//! - ロックが単一の書き込み点になるので、キーの一意性は自明に守られる
//! - 返すのは常に clone（スナップショット）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NewTask, TaskKey, TaskRecord};
use crate::ports::{StoreError, TaskFilter, TaskStore, TaskUpdate};

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<TaskKey, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Overwrites (or inserts) a row as-is. Used to seed fixtures.
    pub async fn put(&self, record: TaskRecord) {
        self.records.lock().await.insert(record.key.clone(), record);
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find_or_create(
        &self,
        key: &TaskKey,
        defaults: NewTask,
    ) -> Result<(TaskRecord, bool), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(key) {
            return Ok((existing.clone(), false));
        }
        let record = TaskRecord::new(key.clone(), defaults);
        records.insert(key.clone(), record.clone());
        Ok((record, true))
    }

    async fn create_if_absent(
        &self,
        key: &TaskKey,
        fields: NewTask,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(key) {
            return Ok(None);
        }
        let record = TaskRecord::new(key.clone(), fields);
        records.insert(key.clone(), record.clone());
        Ok(Some(record))
    }

    async fn update_where(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let mut count = 0;
        for record in records.values_mut().filter(|r| filter.matches(r)) {
            update.apply(record);
            count += 1;
        }
        Ok(count)
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}
