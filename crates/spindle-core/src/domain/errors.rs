//! Errors - エラー型と分類
//!
//! - `SpindleError`: 投入側・ディスパッチ側に返るドメインエラー
//! - `StoreError`: 永続化層のエラー（`SpindleError::StorageUnavailable` に包まれる）
//! - `ErrorKind`: 運用上の分類（リトライ可否・インフラ障害）

use std::time::Duration;

use thiserror::Error;

use super::TaskType;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（ストレージ障害など）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Failure of the durable store. Callers must not assume a partial write
/// succeeded.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum SpindleError {
    /// The durable record could not be encoded or decoded.
    #[error("malformed task: {0}")]
    MalformedTask(String),

    /// No handler is registered for this task type.
    #[error("unknown task type: {0}")]
    UnknownType(TaskType),

    /// The target queue is not configured.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    /// The handler exceeded its execution budget.
    #[error("handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    /// Backpressure: the queue already holds `limit` waiting tasks.
    #[error("queue {queue} is full ({limit} pending)")]
    QueueFull { queue: String, limit: usize },

    #[error("invalid submit options: {0}")]
    InvalidOptions(String),
}

impl SpindleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpindleError::HandlerTimeout(_) | SpindleError::QueueFull { .. } => {
                ErrorKind::Transient
            }
            SpindleError::StorageUnavailable(_) => ErrorKind::Infrastructure,
            SpindleError::MalformedTask(_)
            | SpindleError::UnknownType(_)
            | SpindleError::UnknownQueue(_)
            | SpindleError::InvalidOptions(_) => ErrorKind::Permanent,
        }
    }

    /// Should a task failing with this error be retried?
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_taxonomy() {
        assert!(SpindleError::HandlerTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!SpindleError::MalformedTask("bad magic".into()).is_retryable());
        assert!(!SpindleError::UnknownType(TaskType::new("nope")).is_retryable());
        assert_eq!(
            SpindleError::from(StoreError::Unavailable("disk".into())).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn messages_name_the_culprit() {
        let err = SpindleError::QueueFull {
            queue: "low".into(),
            limit: 3,
        };
        assert_eq!(err.to_string(), "queue low is full (3 pending)");
        assert!(SpindleError::UnknownType(TaskType::new("email:delivery"))
            .to_string()
            .contains("email:delivery"));
    }
}
