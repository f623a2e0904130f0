//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast 設計）
//! - expect_tasks() で期待される task_type を登録
//! - build() 時に「期待集合 ⊆ 登録済み集合」と設定の妥当性をチェック
//! - 不足があれば BuildError を返す

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use super::client::Client;
use super::gc_loop::GcLoop;
use super::reaper_loop::ReaperLoop;
use super::runtime::Runtime;
use super::scheduler::Scheduler;
use super::worker_loop::{Dispatcher, WorkerPool};
use crate::config::{ConfigError, SpindleConfig};
use crate::domain::{Decider, DefaultDecider, SpindleError, StoreError, TaskState, TaskType};
use crate::impls::open_store;
use crate::ports::{Clock, ScanFilter, SystemClock, TaskStore, UlidGenerator};
use crate::queue::QueueRouter;
use crate::typed::{DynHandler, Handler, RegistryError, Task, TypedRegistry};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .with_config(config)
///     .register::<EmailDelivery, _>(EmailHandler)?
///     .expect_tasks(&["email:delivery"])
///     .build()
///     .await?;
/// let runtime = app.start().await?;
/// ```
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
    config: SpindleConfig,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    decider: Option<Arc<dyn Decider>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
            config: SpindleConfig::default(),
            store: None,
            clock: None,
            decider: None,
        }
    }

    pub fn with_config(mut self, config: SpindleConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of opening one from `config.store`.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the default backoff/dead-letter policy.
    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_dyn(mut self, handler: Arc<dyn DynHandler>) -> Result<Self, RegistryError> {
        self.registry.register_dyn(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// 検証してから App を生成
    ///
    /// # 検証
    /// - expect_tasks() の task_type が全て登録済みか（BuildError::MissingTaskTypes）
    /// - 設定が妥当か（BuildError::Config）
    /// - store が開けるか（BuildError::Store）
    pub async fn build(self) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(&TaskType::new(t.as_str())))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config.store).await?,
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let decider: Arc<dyn Decider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(DefaultDecider::new(self.config.retry.policy())),
        };

        let config = self.config;
        let registry = Arc::new(self.registry);
        let router = Arc::new(QueueRouter::new(&config.queues));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            router.clone(),
            clock.clone(),
            config.tick_interval(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            router.clone(),
            scheduler.clone(),
            registry.clone(),
            decider,
            clock.clone(),
            config.handler_timeout(),
        ));
        let client = Client::new(
            store.clone(),
            router.clone(),
            scheduler.clone(),
            registry.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
            config.default_max_retries,
        );

        Ok(App {
            config,
            registry,
            store,
            router,
            scheduler,
            dispatcher,
            clock,
            client,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 構築済み・未起動のアプリケーション
///
/// `client()` での投入は起動前でも可能（起動時に store から再構築される）。
pub struct App {
    config: SpindleConfig,
    registry: Arc<TypedRegistry>,
    store: Arc<dyn TaskStore>,
    router: Arc<QueueRouter>,
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    client: Client,
}

impl App {
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn config(&self) -> &SpindleConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        self.registry.registered_types()
    }

    /// Recover from the store and spawn the scheduler, reaper, GC and workers.
    ///
    /// Recovery order: reclaim every Active task, rebuild the schedule index,
    /// then refill the ready lanes from the Pending scan.
    pub async fn start(self) -> Result<Runtime, SpindleError> {
        let config = &self.config;
        let reaper = Arc::new(ReaperLoop::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            config.lease_timeout(),
            Duration::from_millis(config.reaper.interval_ms),
        ));
        let gc = Arc::new(GcLoop::new(
            self.store.clone(),
            self.clock.clone(),
            Duration::from_secs(config.gc.retention_secs),
            Duration::from_millis(config.gc.interval_ms),
        ));

        let reclaimed = reaper.reclaim_all().await?;
        let waiting = self.scheduler.rebuild().await?;
        let ready = self.reload_router().await?;
        info!(reclaimed, waiting, ready, "recovered state from store");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = vec![
            tokio::spawn(self.scheduler.clone().run(shutdown_rx.clone())),
            tokio::spawn(reaper.run(shutdown_rx.clone())),
            tokio::spawn(gc.run(shutdown_rx.clone())),
        ];
        let workers = WorkerPool::spawn(config.concurrency, self.dispatcher.clone(), shutdown_rx);
        joins.extend(workers.into_handles());

        info!(
            concurrency = config.concurrency,
            queues = ?self.router.queue_names().collect::<Vec<_>>(),
            task_types = ?self.registry.registered_types(),
            "runtime started"
        );
        Ok(Runtime::new(shutdown_tx, self.router, joins, self.client))
    }

    async fn reload_router(&self) -> Result<usize, SpindleError> {
        self.router.reset().await;
        let pending = self
            .store
            .scan(ScanFilter::state(TaskState::Pending))
            .await?;
        let mut ready = 0;
        for record in pending {
            match self.router.enqueue(&record.queue, record.id).await {
                Ok(_) => ready += 1,
                Err(err) => {
                    error!(task_id = %record.id, queue = %record.queue, error = %err, "pending task has no queue")
                }
            }
        }
        Ok(ready)
    }
}
