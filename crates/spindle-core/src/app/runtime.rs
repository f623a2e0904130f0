//! Runtime - 起動済みアプリケーションのハンドル
//!
//! # graceful shutdown
//! 1. watch を true にする（scheduler / reaper / gc は次の select で抜ける）
//! 2. QueueRouter を close（dequeue 待ちのワーカーが起きる）
//! 3. 実行中の handler は最後まで走らせ、全タスクの終了を待つ

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::client::Client;
use crate::queue::QueueRouter;

pub struct Runtime {
    shutdown_tx: watch::Sender<bool>,
    router: Arc<QueueRouter>,
    joins: Vec<JoinHandle<()>>,
    client: Client,
}

impl Runtime {
    pub(crate) fn new(
        shutdown_tx: watch::Sender<bool>,
        router: Arc<QueueRouter>,
        joins: Vec<JoinHandle<()>>,
        client: Client,
    ) -> Self {
        Self {
            shutdown_tx,
            router,
            joins,
            client,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop claiming new work. In-flight handlers keep running.
    pub fn request_shutdown(&self) {
        // send_replace never fails, even with no receivers left
        self.shutdown_tx.send_replace(true);
        self.router.close();
    }

    /// Shutdown and wait for every background task.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "background task failed");
            }
        }
        info!("runtime stopped");
    }
}
