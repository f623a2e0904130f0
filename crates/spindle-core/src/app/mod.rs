//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Client**: タスク投入・状態参照 API
//! - **Runtime**: 起動済みアプリケーション（graceful shutdown）
//! - **Scheduler**: 遅延・リトライ待ちタスクの昇格
//! - **WorkerPool**: タスク実行ループ（dequeue→claim→handle→decide）
//! - **ReaperLoop**: 孤立した Active タスクの回収
//! - **GcLoop**: 完了タスクの削除

pub mod builder;
pub mod client;
pub mod gc_loop;
pub mod reaper_loop;
pub mod runtime;
pub mod scheduler;
pub mod status;
mod storage_retry;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::client::Client;
pub use self::gc_loop::GcLoop;
pub use self::reaper_loop::ReaperLoop;
pub use self::runtime::Runtime;
pub use self::scheduler::Scheduler;
pub use self::status::{Health, QueueStats};
pub use self::worker_loop::{Dispatcher, WorkerPool};
