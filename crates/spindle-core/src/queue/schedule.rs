//! Time-ordered index over Scheduled/Retry tasks.
//!
//! The store is the arena; this heap is a rebuildable secondary structure.
//! Entries can go stale (task deleted, re-claimed, rescheduled); the
//! Scheduler re-checks each popped entry against the store.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::domain::{TaskId, TaskRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntry {
    pub run_at: DateTime<Utc>,
    /// Revision of the record when it was scheduled; FIFO tie-break.
    pub revision: u64,
    pub task_id: TaskId,
}

impl ScheduledEntry {
    /// `None` if the record is not waiting.
    pub fn for_record(record: &TaskRecord) -> Option<Self> {
        if !record.state.is_waiting() {
            return None;
        }
        record.next_run_at.map(|run_at| Self {
            run_at,
            revision: record.revision,
            task_id: record.id,
        })
    }
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: BinaryHeap is a max-heap, we want the earliest first.
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.revision.cmp(&self.revision))
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

#[derive(Debug, Default)]
pub struct ScheduleIndex {
    heap: BinaryHeap<ScheduledEntry>,
}

impl ScheduleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ScheduledEntry) {
        self.heap.push(entry);
    }

    /// Remove and return every entry with `run_at <= now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledEntry> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.run_at > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|entry| entry.run_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ulid::Ulid;

    fn entry(run_at: DateTime<Utc>, revision: u64) -> ScheduledEntry {
        ScheduledEntry {
            run_at,
            revision,
            task_id: TaskId::from_ulid(Ulid::new()),
        }
    }

    #[test]
    fn pops_only_due_entries_in_time_order() {
        let t0 = Utc::now();
        let mut index = ScheduleIndex::new();
        index.push(entry(t0 + Duration::seconds(5), 1));
        index.push(entry(t0 + Duration::seconds(1), 2));
        index.push(entry(t0 + Duration::seconds(3), 3));

        let due = index.pop_due(t0 + Duration::seconds(3));
        let revisions: Vec<u64> = due.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![2, 3]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.next_run_at(), Some(t0 + Duration::seconds(5)));
    }

    #[test]
    fn equal_times_pop_in_insertion_order() {
        let t0 = Utc::now();
        let mut index = ScheduleIndex::new();
        for revision in [7, 3, 9, 1] {
            index.push(entry(t0, revision));
        }

        let revisions: Vec<u64> = index.pop_due(t0).iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![1, 3, 7, 9]);
        assert!(index.is_empty());
    }

    #[test]
    fn nothing_due_before_run_at() {
        let t0 = Utc::now();
        let mut index = ScheduleIndex::new();
        index.push(entry(t0 + Duration::milliseconds(1), 1));
        assert!(index.pop_due(t0).is_empty());
    }
}
