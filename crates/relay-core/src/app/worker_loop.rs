//! WorkerLoop - キューから invocation を取り出して実行するループ
//!
//! # フロー
//! 1. WorkSource::next() で ready な invocation を待つ（shutdown と競合）
//! 2. App::dispatch() で runner に渡す（1 attempt を最後まで実行）
//! 3. 結果をログに残す（エラーでもループは止めない）

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::builder::App;
use crate::error::RelayError;
use crate::ports::WorkSource;

/// Worker group handle.
/// - `request_shutdown()` で全ワーカーが新しい invocation を取らなくなる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawns `n` workers pulling from `source`.
    pub fn spawn(n: usize, source: Arc<dyn WorkSource>, app: Arc<App>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let source = Arc::clone(&source);
            let app = Arc::clone(&app);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, source, app, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// In-flight attempts run to completion; workers just stop taking new
    /// invocations.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    source: Arc<dyn WorkSource>,
    app: Arc<App>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let invocation = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            invocation = source.next() => invocation,
        };

        // source が閉じた
        let Some(invocation) = invocation else {
            break;
        };

        let task_name = invocation.task_name.clone();
        match app.dispatch(invocation).await {
            Ok(outcome) => debug!(worker_id, task_name = %task_name, ?outcome, "attempt done"),
            Err(RelayError::TaskNotFound(_)) => {
                warn!(worker_id, task_name = %task_name, "invocation dropped")
            }
            Err(err) => error!(
                worker_id,
                task_name = %task_name,
                error = %err,
                "attempt failed to schedule follow-up work"
            ),
        }
    }
    info!(worker_id, "worker stopped");
}
