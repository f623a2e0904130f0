//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. QueueRouter::dequeue() で task_id 取得
//! 2. TaskStore::compare_and_set() で Pending → Active（claim）
//! 3. TaskCodec で decode、TypedRegistry で handler を引く
//! 4. handler を timeout 付きで実行 → Outcome
//! 5. Decider → Decision（Completed / Retry / DeadLetter）を CAS で反映
//!
//! # shutdown
//! - shutdown を受けたら新しいタスクは取らない
//! - 実行中の handler は最後まで（handler timeout が上限）待つ

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::scheduler::Scheduler;
use super::storage_retry::retry_storage;
use crate::domain::{
    DeadLetterEntry, Decider, Decision, HandlerError, Outcome, SpindleError, TaskRecord, TaskState,
};
use crate::ports::{Clock, StoreError, TaskStore};
use crate::queue::{QueueRouter, Ready};
use crate::typed::{TaskCodec, TypedRegistry};

/// Shared state every worker (and the reaper) needs to move a task along.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    router: Arc<QueueRouter>,
    scheduler: Arc<Scheduler>,
    registry: Arc<TypedRegistry>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        router: Arc<QueueRouter>,
        scheduler: Arc<Scheduler>,
        registry: Arc<TypedRegistry>,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            store,
            router,
            scheduler,
            registry,
            decider,
            clock,
            handler_timeout,
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Claim, execute and settle one ready task.
    pub async fn process(&self, worker: usize, ready: Ready, shutdown: &mut watch::Receiver<bool>) {
        let task_id = ready.task_id;
        let store = &self.store;

        let Some(current) = retry_storage("get", shutdown, move || store.get(task_id)).await else {
            return;
        };
        let Some(current) = current else {
            debug!(worker, %task_id, "ready task no longer exists");
            return;
        };
        if current.state != TaskState::Pending {
            debug!(worker, %task_id, state = %current.state, "ready entry is stale");
            return;
        }

        let mut next = current.clone();
        next.activate(self.clock.now());
        let claimed = retry_storage("claim", shutdown, || {
            store.compare_and_set(&current, next.clone())
        })
        .await;
        let Some(Some(active)) = claimed else {
            debug!(worker, %task_id, "claim lost");
            return;
        };

        debug!(worker, %task_id, task_type = %active.task_type, queue = %active.queue, "task claimed");
        let outcome = self.execute(worker, &active).await;
        retry_storage("settle", shutdown, || self.settle(&active, &outcome)).await;
    }

    /// Decode and run the handler for an Active task.
    async fn execute(&self, worker: usize, active: &TaskRecord) -> Outcome {
        let decoded = match TaskCodec::decode(&active.message) {
            Ok(decoded) => decoded,
            Err(err) => return fatal(SpindleError::from(err)),
        };
        if decoded.task_type != active.task_type {
            return fatal(SpindleError::MalformedTask(format!(
                "frame type {} does not match record type {}",
                decoded.task_type, active.task_type
            )));
        }
        let Some(handler) = self.registry.get(&decoded.task_type) else {
            return fatal(SpindleError::UnknownType(decoded.task_type));
        };

        // Spawned: a handler panic comes back as a JoinError.
        let payload = decoded.payload;
        let mut run = tokio::spawn(async move { handler.handle_dyn(&payload).await });
        match tokio::time::timeout(self.handler_timeout, &mut run).await {
            Ok(Ok(result)) => Outcome::from_result(result),
            Ok(Err(join_err)) => {
                error!(worker, task_id = %active.id, error = %join_err, "handler panicked");
                Outcome::Failure(HandlerError::retryable(format!("handler panicked: {join_err}")))
            }
            Err(_) => {
                run.abort();
                warn!(worker, task_id = %active.id, timeout_ms = self.handler_timeout.as_millis() as u64, "handler timed out");
                Outcome::TimedOut(self.handler_timeout)
            }
        }
    }

    /// Apply `outcome` to an Active task with a single CAS.
    ///
    /// `Ok(None)` means the task was no longer in the expected revision
    /// (for example, the reaper reclaimed it first).
    pub async fn settle(
        &self,
        current: &TaskRecord,
        outcome: &Outcome,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let now = self.clock.now();
        let mut next = current.clone();

        if matches!(outcome, Outcome::Success) {
            next.complete(now);
            let stored = self.store.compare_and_set(current, next).await?;
            match &stored {
                Some(_) => info!(task_id = %current.id, task_type = %current.task_type, "task completed"),
                None => warn!(task_id = %current.id, "completion lost; task was reclaimed"),
            }
            return Ok(stored);
        }

        match self.decider.decide(current, outcome) {
            Decision::Retry { delay, reason } => {
                // Delays past chrono's range park the task at the far end of time.
                let run_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                next.schedule_retry(run_at, reason.clone(), now);
                let stored = self.store.compare_and_set(current, next).await?;
                if let Some(stored) = &stored {
                    warn!(
                        task_id = %stored.id,
                        retry_count = stored.retry_count,
                        max_retries = stored.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "task failed; retry scheduled"
                    );
                    self.scheduler.schedule(stored).await;
                }
                Ok(stored)
            }
            Decision::DeadLetter { reason } => {
                next.bury(reason.clone(), now);
                let entry = DeadLetterEntry::new(next.clone(), reason.clone(), now);
                let stored = self.store.dead_letter(current, next, entry).await?;
                if stored.is_some() {
                    error!(task_id = %current.id, task_type = %current.task_type, error = %reason, "task dead-lettered");
                }
                Ok(stored)
            }
        }
    }

    pub fn router(&self) -> &Arc<QueueRouter> {
        &self.router
    }
}

fn fatal(err: SpindleError) -> Outcome {
    Outcome::Failure(HandlerError::permanent(err.to_string()))
}

/// Worker group handle.
/// - shutdown の watch が true になるとワーカーは新しいタスクを取らない
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerPool {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, dispatcher: Arc<Dispatcher>, shutdown: watch::Receiver<bool>) -> Self {
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let dispatcher = Arc::clone(&dispatcher);
            let rx = shutdown.clone();
            joins.push(tokio::spawn(worker_loop(worker_id, dispatcher, rx)));
        }
        info!(workers = n, "worker pool started");
        Self { joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        self.joins
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task failed");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        // dequeue は待つので shutdown と競合させる
        let ready = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            ready = dispatcher.router().dequeue() => ready,
        };

        // None = router closed
        let Some(ready) = ready else {
            break;
        };

        dispatcher.process(worker_id, ready, &mut shutdown).await;
    }
    debug!(worker = worker_id, "worker stopped");
}
