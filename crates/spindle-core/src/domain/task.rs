//! Task record: the single source of truth for a task's state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskState};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Metadata + encoded message for a task.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Queue lanes and the schedule index hold TaskIds only.
/// - All state transitions happen through the methods below; the store
///   persists whatever the caller hands it under a revision CAS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub queue: String,

    /// Framed (type + payload) bytes produced by `TaskCodec`.
    pub message: Vec<u8>,

    pub state: TaskState,

    /// Number of failed attempts that were followed by a retry.
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set iff state is Scheduled or Retry.
    pub next_run_at: Option<DateTime<Utc>>,

    /// Set iff state is Active. The reaper uses it to find orphaned claims.
    pub active_since: Option<DateTime<Utc>>,

    /// Set iff state is Completed. Drives retention cleanup.
    pub completed_at: Option<DateTime<Utc>>,

    /// Store-assigned, globally increasing write counter.
    /// Compare-and-set token and FIFO key; 0 means "never stored".
    pub revision: u64,
}

impl TaskRecord {
    /// A task that is ready to run immediately.
    pub fn pending(
        id: TaskId,
        task_type: TaskType,
        queue: impl Into<String>,
        message: Vec<u8>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            queue: queue.into(),
            message,
            state: TaskState::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            created_at: now,
            updated_at: now,
            next_run_at: None,
            active_since: None,
            completed_at: None,
            revision: 0,
        }
    }

    /// A task that must not run before `run_at`.
    pub fn scheduled(
        id: TaskId,
        task_type: TaskType,
        queue: impl Into<String>,
        message: Vec<u8>,
        max_retries: u32,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::pending(id, task_type, queue, message, max_retries, now);
        record.state = TaskState::Scheduled;
        record.next_run_at = Some(run_at);
        record
    }

    /// Pending -> Active.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.state, TaskState::Pending);
        self.state = TaskState::Active;
        self.active_since = Some(now);
        self.updated_at = now;
    }

    /// Active -> Completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.state, TaskState::Active);
        self.state = TaskState::Completed;
        self.active_since = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Active -> Retry. Consumes one unit of the retry budget.
    pub fn schedule_retry(&mut self, run_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        debug_assert_eq!(self.state, TaskState::Active);
        self.state = TaskState::Retry;
        self.retry_count += 1;
        self.next_run_at = Some(run_at);
        self.active_since = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Any non-terminal state -> DeadLetter.
    pub fn bury(&mut self, error: String, now: DateTime<Utc>) {
        debug_assert!(!self.state.is_terminal());
        self.state = TaskState::DeadLetter;
        self.next_run_at = None;
        self.active_since = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Scheduled/Retry -> Pending.
    pub fn promote(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.state.is_waiting());
        self.state = TaskState::Pending;
        self.next_run_at = None;
        self.updated_at = now;
    }

    /// Is the retry budget spent?
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Has this waiting task reached its next-run time?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_waiting() && self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Check the field-level invariants tied to the state.
    pub fn is_consistent(&self) -> bool {
        self.state.is_waiting() == self.next_run_at.is_some()
            && (self.state == TaskState::Active) == self.active_since.is_some()
            && (self.state == TaskState::Completed) == self.completed_at.is_some()
    }
}
