//! Client - タスク投入 API
//!
//! # submit のフロー
//! 1. SubmitOptions 検証（delay と eta の併用不可）
//! 2. task_type の handler 登録チェック（未登録は即エラー）
//! 3. キュー存在チェック・max_pending による流入制限
//! 4. TaskCodec で encode → TaskStore に保存
//! 5. 即時なら QueueRouter、遅延なら Scheduler へ
//!
//! Client はワーカーを待たないので、ランタイム起動前でも使えます。

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use super::scheduler::Scheduler;
use super::status::{Health, QueueStats, queue_stats};
use crate::domain::{
    DeadLetterEntry, SpindleError, SubmitOptions, TaskHandle, TaskId, TaskRecord, TaskState,
    TaskType,
};
use crate::ports::{Clock, IdGenerator, TaskStore};
use crate::queue::QueueRouter;
use crate::typed::{Task, TaskCodec, TypedRegistry};

#[derive(Clone)]
pub struct Client {
    store: Arc<dyn TaskStore>,
    router: Arc<QueueRouter>,
    scheduler: Arc<Scheduler>,
    registry: Arc<TypedRegistry>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    default_max_retries: u32,
    /// Serializes the count-then-put of bounded queues.
    admission: Arc<Mutex<()>>,
}

impl Client {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        router: Arc<QueueRouter>,
        scheduler: Arc<Scheduler>,
        registry: Arc<TypedRegistry>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        default_max_retries: u32,
    ) -> Self {
        Self {
            store,
            router,
            scheduler,
            registry,
            ids,
            clock,
            default_max_retries,
            admission: Arc::new(Mutex::new(())),
        }
    }

    /// Submit a raw payload for `task_type`.
    pub async fn submit(
        &self,
        task_type: impl Into<String>,
        payload: &[u8],
        options: SubmitOptions,
    ) -> Result<TaskHandle, SpindleError> {
        let now = self.clock.now();
        let run_at = options.run_at(now)?;

        let task_type = TaskType::new(task_type);
        if !self.registry.contains(&task_type) {
            return Err(SpindleError::UnknownType(task_type));
        }
        let queue = options.queue_name();
        let spec = self
            .router
            .spec(queue)
            .ok_or_else(|| SpindleError::UnknownQueue(queue.to_string()))?;

        let message = TaskCodec::encode(&task_type, payload)?;
        let id = self.ids.generate_task_id();
        let max_retries = options.max_retries.unwrap_or(self.default_max_retries);
        let record = match run_at {
            None => TaskRecord::pending(id, task_type, queue, message, max_retries, now),
            Some(at) => TaskRecord::scheduled(id, task_type, queue, message, max_retries, at, now),
        };

        let stored = match spec.max_pending {
            Some(limit) => {
                let _admission = self.admission.lock().await;
                let backlog = self.store.count(queue, &TaskState::backlog()).await?;
                if backlog >= limit {
                    return Err(SpindleError::QueueFull {
                        queue: queue.to_string(),
                        limit,
                    });
                }
                self.store.put(record).await?
            }
            None => self.store.put(record).await?,
        };

        if stored.state == TaskState::Pending {
            self.router.enqueue(&stored.queue, stored.id).await?;
        } else {
            self.scheduler.schedule(&stored).await;
        }

        info!(
            task_id = %stored.id,
            task_type = %stored.task_type,
            queue = %stored.queue,
            state = %stored.state,
            "task submitted"
        );
        Ok(TaskHandle {
            id: stored.id,
            queue: stored.queue,
            state: stored.state,
        })
    }

    /// Typed submission; the payload is `task` as JSON.
    pub async fn enqueue<T: Task>(
        &self,
        task: &T,
        options: SubmitOptions,
    ) -> Result<TaskHandle, SpindleError> {
        let payload = serde_json::to_vec(task)
            .map_err(|e| SpindleError::MalformedTask(format!("json encode: {e}")))?;
        self.submit(T::TYPE, &payload, options).await
    }

    pub async fn status(&self, id: TaskId) -> Result<Option<TaskRecord>, SpindleError> {
        Ok(self.store.get(id).await?)
    }

    pub fn health(&self) -> Health {
        Health::healthy(self.clock.now())
    }

    /// Most recent first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, SpindleError> {
        Ok(self.store.dead_letters(limit).await?)
    }

    pub async fn queue_stats(&self) -> Result<Vec<QueueStats>, SpindleError> {
        queue_stats(self.store.as_ref(), self.router.queue_names()).await
    }
}
