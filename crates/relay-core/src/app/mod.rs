//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて追跡付きタスク実行を実装します。
//!
//! # 主要コンポーネント
//! - **TrackedTask**: unit of work を台帳付きで 1 attempt ずつ実行する runner
//! - **ChildVerifier**: 子タスクの照合（expire / 再実行 / 作成）
//! - **AppBuilder / App**: runner の登録と dispatch
//! - **WorkerGroup**: キューから取り出して dispatch するワーカー群

mod children;
pub mod builder;
pub mod context;
pub mod policy;
pub mod registry;
pub mod runner;
pub mod work;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::context::{TaskContext, TaskServices, require_finished};
pub use self::policy::TaskPolicy;
pub use self::registry::TaskRegistry;
pub use self::runner::TrackedTask;
pub use self::work::{FnWork, UnitOfWork, work_fn};
pub use self::worker_loop::WorkerGroup;
