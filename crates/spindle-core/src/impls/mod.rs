//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・デモ用の正本（プロセス終了で消える）
//! - **SqliteTaskStore**: 永続化された正本（WAL + synchronous=FULL）

pub mod memory_store;
pub mod sqlite_store;

pub use self::memory_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::ports::{StoreError, TaskStore};

/// SQLite when `path` is set, otherwise an in-memory store.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn TaskStore>, StoreError> {
    match &config.path {
        Some(path) => Ok(Arc::new(SqliteTaskStore::open(path).await?)),
        None => Ok(Arc::new(InMemoryTaskStore::new())),
    }
}
