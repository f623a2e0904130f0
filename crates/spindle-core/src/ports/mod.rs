//! Ports - 抽象化レイヤー
//!
//! 外部システム（ストレージ・時刻・ID 生成）へのインターフェースを定義します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - QueueRouter / ScheduleIndex は TaskStore から再構築できる派生データ

pub mod clock;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{ScanFilter, StoreError, TaskStore};
