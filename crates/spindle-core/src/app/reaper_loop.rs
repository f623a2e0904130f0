//! ReaperLoop - 孤立した Active タスクの回収
//!
//! # フロー
//! 1. 定期的に Active タスクを scan
//! 2. `active_since + handler_timeout + lease_grace <= now` のものを回収対象にする
//! 3. "worker lost" の retryable 失敗として Decider に通す（Retry または DeadLetter）
//!
//! 起動時は前回プロセスのワーカーがすべて死んでいるので、Active を全件回収します。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::worker_loop::Dispatcher;
use crate::domain::{HandlerError, Outcome, SpindleError, TaskRecord, TaskState};
use crate::ports::{Clock, ScanFilter, TaskStore};

pub const WORKER_LOST: &str = "worker lost";

pub struct ReaperLoop {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    lease_timeout: Duration,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        lease_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            lease_timeout,
            interval,
        }
    }

    /// Reclaim Active tasks whose lease ran out. Returns how many were reclaimed.
    pub async fn reap_expired(&self) -> Result<usize, SpindleError> {
        let now = self.clock.now();
        let lease = chrono::Duration::from_std(self.lease_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let active = self.store.scan(ScanFilter::state(TaskState::Active)).await?;
        let expired = active.into_iter().filter(|record| {
            record
                .active_since
                .and_then(|since| since.checked_add_signed(lease))
                .is_some_and(|deadline| deadline <= now)
        });
        self.reclaim(expired).await
    }

    /// Startup recovery: every Active task belongs to a dead process.
    pub async fn reclaim_all(&self) -> Result<usize, SpindleError> {
        let active = self.store.scan(ScanFilter::state(TaskState::Active)).await?;
        self.reclaim(active.into_iter()).await
    }

    async fn reclaim(
        &self,
        records: impl Iterator<Item = TaskRecord>,
    ) -> Result<usize, SpindleError> {
        let outcome = Outcome::Failure(HandlerError::retryable(WORKER_LOST));
        let mut reclaimed = 0;
        for record in records {
            if self.dispatcher.settle(&record, &outcome).await?.is_some() {
                warn!(task_id = %record.id, queue = %record.queue, "reclaimed orphaned task");
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already reclaimed everything.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.reap_expired().await {
                        warn!(error = %err, "reaper pass failed; retrying next interval");
                    }
                }
            }
        }
        info!("reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::scheduler::Scheduler;
    use crate::config::QueueSpec;
    use crate::domain::{DefaultDecider, TaskId, TaskType};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::FixedClock;
    use crate::queue::{QueueRouter, RetryPolicy};
    use crate::typed::TypedRegistry;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        clock: Arc<FixedClock>,
        scheduler: Arc<Scheduler>,
        reaper: ReaperLoop,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let router = Arc::new(QueueRouter::new(&[QueueSpec::new("default", 1)]));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            router.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            router,
            scheduler.clone(),
            Arc::new(TypedRegistry::new()),
            Arc::new(DefaultDecider::new(RetryPolicy::without_jitter(
                Duration::from_secs(1),
                2.0,
                Duration::from_secs(60),
            ))),
            clock.clone(),
            Duration::from_secs(30),
        ));
        let reaper = ReaperLoop::new(
            store.clone(),
            dispatcher,
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        Fixture {
            store,
            clock,
            scheduler,
            reaper,
        }
    }

    async fn active(f: &Fixture, max_retries: u32) -> TaskRecord {
        let now = f.clock.now();
        let pending = f
            .store
            .put(TaskRecord::pending(
                TaskId::from_ulid(Ulid::new()),
                TaskType::new("email:delivery"),
                "default",
                vec![],
                max_retries,
                now,
            ))
            .await
            .unwrap();
        let mut next = pending.clone();
        next.activate(now);
        f.store.compare_and_set(&pending, next).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn only_expired_leases_are_reaped() {
        let f = fixture();
        let record = active(&f, 3).await;

        f.clock.advance(chrono::Duration::seconds(59));
        assert_eq!(f.reaper.reap_expired().await.unwrap(), 0);

        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.reaper.reap_expired().await.unwrap(), 1);

        let stored = f.store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Retry);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some(WORKER_LOST));
        assert_eq!(f.scheduler.len().await, 1);
    }

    #[tokio::test]
    async fn reclaim_all_ignores_lease_age() {
        let f = fixture();
        let a = active(&f, 3).await;
        let b = active(&f, 0).await;

        assert_eq!(f.reaper.reclaim_all().await.unwrap(), 2);
        assert_eq!(
            f.store.get(a.id).await.unwrap().unwrap().state,
            TaskState::Retry
        );
        // No retry budget left: straight to the dead-letter set.
        assert_eq!(
            f.store.get(b.id).await.unwrap().unwrap().state,
            TaskState::DeadLetter
        );
        assert_eq!(f.store.dead_letters(10).await.unwrap().len(), 1);
    }
}
