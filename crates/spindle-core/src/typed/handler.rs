//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (`Handler<T>`)
//! - Object-safe trait (`DynHandler`)
//! - Type erasure (`TypedHandler<T, H>` → `DynHandler`)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::HandlerError;

/// Handler は Task を実行する
///
/// # 使用例
/// ```ignore
/// struct EmailHandler;
///
/// #[async_trait]
/// impl Handler<EmailDelivery> for EmailHandler {
///     async fn handle(&self, task: EmailDelivery) -> Result<(), HandlerError> {
///         send(&task.to).await.map_err(|e| HandlerError::retryable(e.to_string()))
///     }
/// }
/// ```
///
/// `HandlerError::permanent` を返すとリトライせずに dead-letter へ送られます。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<(), HandlerError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// payload（JSON バイト列）を受け取るので、
/// `HashMap<TaskType, Arc<dyn DynHandler>>` に格納できます。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: &[u8]) -> Result<(), HandlerError>;
    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: &[u8]) -> Result<(), HandlerError> {
        // A payload that does not fit the type will not fit on retry either.
        let task: T = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::permanent(format!("json decode: {e}")))?;
        self.handler.handle(task).await
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}
