//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発・テスト用の台帳
//! - **SqliteTaskStore**: sqlx による永続台帳
//! - **InMemoryWorkQueue**: 開発用の遅延付き配送キュー（WorkQueue + WorkSource）

pub mod inmem_queue;
pub mod inmem_store;
pub mod sqlite_store;

pub use self::inmem_queue::{Enqueued, InMemoryWorkQueue};
pub use self::inmem_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;
