//! Typed - 型付き Task API
//!
//! このモジュールは task_type の typo を型で排除し、
//! Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//!
//! ワイヤ上のタスクは `TaskCodec` のフレーム（type + payload）として保存されます。

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, DecodedTask, TaskCodec};
pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::Task;
