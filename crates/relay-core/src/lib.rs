//! relay-core
//!
//! Ledger-tracked task execution for a CI orchestrator: every logical task
//! (a build sync, a job sync, an artifact fetch) is one row in a task store,
//! and each attempt of it is one invocation pulled off a delayed work queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task name, status/result, record, invocation, outcome, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, WorkQueue/WorkSource, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryTaskStore, SqliteTaskStore, InMemoryWorkQueue）
//! - **app**: アプリケーションロジック（runner, child verification, builder, worker_loop）
//! - **typed**: 型付き Task API（Task trait, Handler trait, codec）
//! - **config**: RelayConfig（defaults → TOML → 環境変数）

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::app::{
    App, AppBuilder, TaskContext, TaskPolicy, TaskServices, TrackedTask, UnitOfWork, WorkerGroup,
    require_finished, work_fn,
};
pub use crate::config::RelayConfig;
pub use crate::domain::{
    Arguments, AttemptOutcome, Invocation, Status, TaskError, TaskId, TaskKey, TaskName,
    TaskRecord, TaskResult,
};
pub use crate::error::RelayError;
