//! Dead-letter entries: terminal record of an unprocessable task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskRecord};

/// Snapshot of a task at the moment it was given up on.
///
/// Immutable once written; the store keeps at most one per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: TaskRecord,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(task: TaskRecord, error: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            task,
            error: error.into(),
            failed_at,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }
}
