//! InMemoryWorkQueue - 開発用の遅延付き配送キュー
//!
//! # 実装詳細
//! - ready: すぐ実行できる invocation（FIFO）
//! - scheduled: delay 付きの invocation（BinaryHeap の min-heap）
//! - Notify で待機中のワーカーを起こす
//! - 時刻は tokio::time::Instant（テストでは時間を止められる）
//! - history: 直近の enqueue だけを保持（上限付き）

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{Arguments, Invocation, TaskName};
use crate::ports::{QueueError, WorkQueue, WorkSource};

/// Enqueues kept by default; the oldest are dropped beyond this.
const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// One accepted `enqueue` call, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub invocation: Invocation,
    pub delay: Duration,
}

/// Scheduled entry. Ordering is reversed so BinaryHeap pops the earliest
/// `ready_at` first; `seq` keeps FIFO order among equal deadlines.
#[derive(Debug)]
struct Scheduled {
    ready_at: Instant,
    seq: u64,
    invocation: Invocation,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Invocation>,
    scheduled: BinaryHeap<Scheduled>,
    history: VecDeque<Enqueued>,
    history_limit: usize,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn record(&mut self, entry: Enqueued) {
        if self.history_limit == 0 {
            return;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.ready_at > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.invocation);
            }
        }
    }
}

pub struct InMemoryWorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// `limit = 0` disables the history entirely.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                history_limit: limit,
                ..QueueState::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Stops accepting work and wakes every waiting consumer. Ready
    /// invocations are still handed out; delayed ones are dropped.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.scheduled.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// The most recent accepted enqueues, oldest first.
    pub async fn history(&self) -> Vec<Enqueued> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Invocations not yet handed out (ready + delayed).
    pub async fn pending(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.scheduled.len()
    }

    /// Non-blocking pop of a ready invocation.
    pub async fn try_next(&self) -> Option<Invocation> {
        let mut state = self.state.lock().await;
        state.promote_due(Instant::now());
        state.ready.pop_front()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(
        &self,
        task_name: &TaskName,
        arguments: Arguments,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let invocation = Invocation::new(task_name.clone(), arguments);
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.record(Enqueued {
                invocation: invocation.clone(),
                delay,
            });
            if delay.is_zero() {
                state.ready.push_back(invocation);
            } else {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.scheduled.push(Scheduled {
                    ready_at: Instant::now() + delay,
                    seq,
                    invocation,
                });
            }
        }
        // 新しい deadline が最短かもしれないので、待機中のワーカーを起こして再計算させる
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl WorkSource for InMemoryWorkQueue {
    async fn next(&self) -> Option<Invocation> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // 状態を見る前に登録しておかないと、close/enqueue の通知を取りこぼす
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_due(Instant::now());

                if let Some(invocation) = state.ready.pop_front() {
                    return Some(invocation);
                }
                if state.closed {
                    return None;
                }
                state.scheduled.peek().map(|entry| entry.ready_at)
            };

            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(wake_at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }
}
