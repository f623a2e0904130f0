//! State - タスクの状態
//!
//! # 状態遷移
//! - Pending -> Active -> Completed
//! - Scheduled -> Pending（next_run_at 到達で Scheduler が昇格）
//! - Active -> Retry -> Pending（retry_count < max_retries の間ループ）
//! - Active -> DeadLetter（リトライ不可 / 上限到達）

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Task state.
///
/// A task is in exactly one state at a time; `next_run_at` is set iff the
/// state is `Scheduled` or `Retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to run; sits in its queue lane until a worker claims it.
    Pending,

    /// Waiting for its ETA / delay.
    Scheduled,

    /// Claimed by a worker.
    Active,

    /// Waiting for retry (delayed due to backoff).
    Retry,

    /// Handler succeeded.
    Completed,

    /// Failed permanently (non-retryable or retries exhausted).
    DeadLetter,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Pending,
        TaskState::Scheduled,
        TaskState::Active,
        TaskState::Retry,
        TaskState::Completed,
        TaskState::DeadLetter,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::DeadLetter)
    }

    /// Does this state carry a next-run timestamp?
    pub fn is_waiting(self) -> bool {
        matches!(self, TaskState::Scheduled | TaskState::Retry)
    }

    /// States that count against a queue's `max_pending` bound.
    pub fn backlog() -> [TaskState; 3] {
        [TaskState::Pending, TaskState::Scheduled, TaskState::Retry]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Scheduled => "scheduled",
            TaskState::Active => "active",
            TaskState::Retry => "retry",
            TaskState::Completed => "completed",
            TaskState::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task state: {0}")]
pub struct ParseStateError(String);

impl FromStr for TaskState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}
