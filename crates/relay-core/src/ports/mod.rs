//! Ports - 抽象化レイヤー
//!
//! 外部システム（台帳ストア、配送キュー、時計）へのインターフェースを定義します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - WorkQueue は配送のみ（状態を持たない）
//! - 時刻は Clock 経由でのみ参照する

pub mod clock;
pub mod id_generator;
pub mod task_store;
pub mod work_queue;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{StoreError, TaskFilter, TaskStore, TaskUpdate};
pub use self::work_queue::{QueueError, WorkQueue, WorkSource};
