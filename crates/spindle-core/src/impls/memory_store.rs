//! InMemoryTaskStore - プロセス内の TaskStore 実装
//!
//! # 実装詳細
//! - `tokio::sync::Mutex` 1 つで全操作を直列化（CAS の原子性もこれで保証）
//! - revision はストア全体で単調増加

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{DeadLetterEntry, TaskId, TaskRecord, TaskState};
use crate::ports::{ScanFilter, StoreError, TaskStore};

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<TaskId, TaskRecord>,
    dead_letters: Vec<DeadLetterEntry>,
    revision: u64,
}

impl Inner {
    fn write(&mut self, mut record: TaskRecord) -> TaskRecord {
        self.revision += 1;
        record.revision = self.revision;
        self.tasks.insert(record.id, record.clone());
        record
    }

    fn revision_matches(&self, current: &TaskRecord) -> bool {
        self.tasks
            .get(&current.id)
            .is_some_and(|stored| stored.revision == current.revision)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put(&self, record: TaskRecord) -> Result<TaskRecord, StoreError> {
        Ok(self.inner.lock().await.write(record))
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.inner.lock().await.tasks.get(&id).cloned())
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.tasks.remove(&id).is_some())
    }

    async fn scan(&self, filter: ScanFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<TaskRecord> = inner
            .tasks
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        // None sorts before Some, which puts unscheduled records first.
        records.sort_by_key(|record| (record.next_run_at, record.revision));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn compare_and_set(
        &self,
        current: &TaskRecord,
        next: TaskRecord,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.revision_matches(current) {
            return Ok(None);
        }
        Ok(Some(inner.write(next)))
    }

    async fn dead_letter(
        &self,
        current: &TaskRecord,
        next: TaskRecord,
        entry: DeadLetterEntry,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.revision_matches(current) {
            return Ok(None);
        }
        let stored = inner.write(next);
        if !inner
            .dead_letters
            .iter()
            .any(|existing| existing.task_id() == entry.task_id())
        {
            inner.dead_letters.push(entry);
        }
        Ok(Some(stored))
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.dead_letters.iter().rev().take(limit).cloned().collect())
    }

    async fn count(&self, queue: &str, states: &[TaskState]) -> Result<usize, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .values()
            .filter(|record| record.queue == queue && states.contains(&record.state))
            .count())
    }

    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        let len = inner.tasks.len();
        inner.tasks.retain(|_, record| {
            !(record.state == TaskState::Completed
                && record.completed_at.is_some_and(|at| at < before))
        });
        Ok(len - inner.tasks.len())
    }
}
