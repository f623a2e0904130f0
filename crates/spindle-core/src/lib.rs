//! spindle-core
//!
//! 永続化されたタスクキューとディスパッチランタイムの中核。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, outcome, decision, submit, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator）
//! - **queue**: 重み付きキュールーター・スケジュール索引・リトライ方針
//! - **app**: アプリケーションロジック（builder, client, runtime, worker_loop, scheduler, reaper, gc）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry, TaskCodec）
//! - **impls**: TaskStore 実装（InMemory / SQLite）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;
