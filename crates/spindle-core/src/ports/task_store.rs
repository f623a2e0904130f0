//! TaskStore port - タスク状態の正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスクレコード（状態・retry_count・next_run_at など）
//! - dead-letter エントリ
//! - revision カウンタ（CAS トークン兼 FIFO 順序）
//!
//! # 設計原則
//! - すべての状態遷移は `compare_and_set`（revision が一致した場合のみ成功）
//! - dead-letter 遷移とエントリ追加は同一トランザクション内
//! - QueueRouter / ScheduleIndex は `scan` で再構築できる

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use crate::domain::StoreError;
use crate::domain::{DeadLetterEntry, TaskId, TaskRecord, TaskState};

/// Selection for `scan`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub state: Option<TaskState>,
    pub queue: Option<String>,
    pub limit: Option<usize>,
}

impl ScanFilter {
    pub fn state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn in_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.state.is_none_or(|state| record.state == state)
            && self
                .queue
                .as_deref()
                .is_none_or(|queue| record.queue == queue)
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or overwrite a record. The stored copy gets a fresh revision,
    /// which is returned.
    async fn put(&self, record: TaskRecord) -> Result<TaskRecord, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Returns `true` if a record was removed.
    async fn delete(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Records matching `filter`, ordered by `next_run_at` (unset first) then revision.
    async fn scan(&self, filter: ScanFilter) -> Result<Vec<TaskRecord>, StoreError>;

    /// Replace `current` with `next` iff the stored revision still equals
    /// `current.revision`. `Ok(None)` means someone else got there first.
    async fn compare_and_set(
        &self,
        current: &TaskRecord,
        next: TaskRecord,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// `compare_and_set` plus recording `entry`, atomically.
    async fn dead_letter(
        &self,
        current: &TaskRecord,
        next: TaskRecord,
        entry: DeadLetterEntry,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Most recent first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StoreError>;

    /// Number of tasks in `queue` whose state is one of `states`.
    async fn count(&self, queue: &str, states: &[TaskState]) -> Result<usize, StoreError>;

    /// Delete Completed tasks finished before `before`. Returns how many went.
    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;
}
