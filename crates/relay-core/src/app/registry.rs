//! TaskRegistry - task name から runner を引く
//!
//! Design:
//! - 起動時に組み立てる（mutable）
//! - 実行中は読むだけ（immutable）なのでロック不要

use std::collections::HashMap;
use std::sync::Arc;

use super::runner::TrackedTask;
use crate::domain::TaskName;
use crate::error::RelayError;

#[derive(Default)]
pub struct TaskRegistry {
    runners: HashMap<TaskName, Arc<TrackedTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runner under its own name. Names are unique.
    pub fn register(&mut self, runner: TrackedTask) -> Result<Arc<TrackedTask>, RelayError> {
        let name = runner.name().clone();
        if self.runners.contains_key(&name) {
            return Err(RelayError::DuplicateTask(name));
        }
        let runner = Arc::new(runner);
        self.runners.insert(name, Arc::clone(&runner));
        Ok(runner)
    }

    pub fn get(&self, name: &TaskName) -> Option<&Arc<TrackedTask>> {
        self.runners.get(name)
    }

    pub fn contains(&self, name: &TaskName) -> bool {
        self.runners.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}
