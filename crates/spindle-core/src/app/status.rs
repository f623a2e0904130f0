//! Status - ヘルスチェックとキュー統計

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{SpindleError, TaskState};
use crate::ports::TaskStore;

pub const HEALTHY: &str = "healthy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub time: DateTime<Utc>,
}

impl Health {
    pub fn healthy(time: DateTime<Utc>) -> Self {
        Self {
            status: HEALTHY.to_string(),
            time,
        }
    }
}

/// Task counts per state for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub pending: usize,
    pub scheduled: usize,
    pub active: usize,
    pub retry: usize,
    pub completed: usize,
    pub dead_letter: usize,
}

impl QueueStats {
    pub async fn collect(store: &dyn TaskStore, queue: &str) -> Result<Self, SpindleError> {
        let mut stats = Self {
            queue: queue.to_string(),
            ..Self::default()
        };
        for state in TaskState::ALL {
            let n = store.count(queue, &[state]).await?;
            *stats.slot(state) = n;
        }
        Ok(stats)
    }

    fn slot(&mut self, state: TaskState) -> &mut usize {
        match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Scheduled => &mut self.scheduled,
            TaskState::Active => &mut self.active,
            TaskState::Retry => &mut self.retry,
            TaskState::Completed => &mut self.completed,
            TaskState::DeadLetter => &mut self.dead_letter,
        }
    }

    /// Pending + Scheduled + Retry: what counts against `max_pending`.
    pub fn backlog(&self) -> usize {
        self.pending + self.scheduled + self.retry
    }

    pub fn total(&self) -> usize {
        self.backlog() + self.active + self.completed + self.dead_letter
    }
}

/// Stats for every queue in `queues`, in the given order.
pub async fn queue_stats<'a>(
    store: &dyn TaskStore,
    queues: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<QueueStats>, SpindleError> {
    let mut out = Vec::new();
    for queue in queues {
        out.push(QueueStats::collect(store, queue).await?);
    }
    Ok(out)
}
