//! Task trait - 型付き Task の定義
//!
//! # Trait Bounds
//! - `Serialize`: arguments への変換のため
//! - `DeserializeOwned`: arguments からの復元のため（'static に対応）
//! - `Send + Sync + 'static`: runner に渡して複数ワーカーから使うため

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskName;

/// Task は task name と arguments の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SyncJob {
///     job_id: String,
/// }
///
/// impl Task for SyncJob {
///     const NAME: &'static str = "sync_job";
/// }
/// ```
///
/// Fields must not be named `task_id` or `parent_task_id`; those keys carry
/// the task identity and never reach the handler.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    fn task_name() -> TaskName {
        TaskName::new(Self::NAME)
    }
}
