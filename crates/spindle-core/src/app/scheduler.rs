//! Scheduler - 遅延タスク・リトライ待ちタスクの昇格
//!
//! # フロー（1 tick）
//! 1. ScheduleIndex から run_at <= now のエントリを取り出す
//! 2. TaskStore の正本と照合（revision 不一致・未到来は stale として捨てる）
//! 3. CAS で Scheduled/Retry → Pending
//! 4. QueueRouter の該当レーンへ enqueue
//!
//! ストレージエラーのエントリはヒープに戻し、次の tick で再試行します。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::domain::{SpindleError, TaskRecord, TaskState};
use crate::ports::{Clock, ScanFilter, StoreError, TaskStore};
use crate::queue::{QueueRouter, ScheduleIndex, ScheduledEntry};

enum Promotion {
    Promoted,
    Stale,
    /// The record was rewritten but is still waiting; track its current entry.
    Reindex(ScheduledEntry),
    Failed(StoreError),
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    router: Arc<QueueRouter>,
    clock: Arc<dyn Clock>,
    index: Mutex<ScheduleIndex>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        router: Arc<QueueRouter>,
        clock: Arc<dyn Clock>,
        tick: Duration,
    ) -> Self {
        Self {
            store,
            router,
            clock,
            index: Mutex::new(ScheduleIndex::new()),
            tick,
        }
    }

    /// Track a stored Scheduled/Retry record. Anything else is ignored.
    pub async fn schedule(&self, record: &TaskRecord) {
        match ScheduledEntry::for_record(record) {
            Some(entry) => {
                debug!(task_id = %record.id, run_at = %entry.run_at, state = %record.state, "task scheduled");
                self.index.lock().await.push(entry);
            }
            None => warn!(task_id = %record.id, state = %record.state, "not a waiting task; ignoring"),
        }
    }

    /// One tick. Returns the number of tasks moved to their queue.
    pub async fn promote_due(&self) -> usize {
        let now = self.clock.now();
        let due = self.index.lock().await.pop_due(now);
        if due.is_empty() {
            return 0;
        }

        let mut promoted = 0;
        let mut push_back = Vec::new();
        for entry in due {
            match self.promote(&entry, now).await {
                Promotion::Promoted => promoted += 1,
                Promotion::Stale => {}
                Promotion::Reindex(current) => push_back.push(current),
                Promotion::Failed(err) => {
                    warn!(task_id = %entry.task_id, error = %err, "promotion failed; retrying next tick");
                    push_back.push(entry);
                }
            }
        }

        if !push_back.is_empty() {
            let mut index = self.index.lock().await;
            for entry in push_back {
                index.push(entry);
            }
        }
        if promoted > 0 {
            debug!(promoted, "promoted due tasks");
        }
        promoted
    }

    async fn promote(&self, entry: &ScheduledEntry, now: DateTime<Utc>) -> Promotion {
        let record = match self.store.get(entry.task_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Promotion::Stale,
            Err(err) => return Promotion::Failed(err),
        };
        if record.revision != entry.revision || !record.is_due(now) {
            return match ScheduledEntry::for_record(&record) {
                Some(current) if current != *entry => {
                    debug!(task_id = %entry.task_id, run_at = %current.run_at, "schedule entry refreshed");
                    Promotion::Reindex(current)
                }
                _ => {
                    debug!(task_id = %entry.task_id, state = %record.state, "stale schedule entry");
                    Promotion::Stale
                }
            };
        }

        let mut next = record.clone();
        next.promote(now);
        let stored = match self.store.compare_and_set(&record, next).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return Promotion::Stale,
            Err(err) => return Promotion::Failed(err),
        };

        if let Err(err) = self.router.enqueue(&stored.queue, stored.id).await {
            // Only reachable if the queue vanished from config across a restart.
            error!(task_id = %stored.id, queue = %stored.queue, error = %err, "cannot route promoted task");
        }
        Promotion::Promoted
    }

    /// Re-derive the index from the store's Scheduled and Retry records.
    pub async fn rebuild(&self) -> Result<usize, SpindleError> {
        let mut entries = Vec::new();
        for state in [TaskState::Scheduled, TaskState::Retry] {
            let records = self.store.scan(ScanFilter::state(state)).await?;
            entries.extend(records.iter().filter_map(ScheduledEntry::for_record));
        }

        let mut index = self.index.lock().await;
        index.clear();
        let count = entries.len();
        for entry in entries {
            index.push(entry);
        }
        info!(count, "schedule index rebuilt");
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }

    pub async fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.index.lock().await.next_run_at()
    }

    /// Tick until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.promote_due().await;
                }
            }
        }
        info!("scheduler stopped");
    }
}
