//! QueueRouter - キューごとの ready レーンと重み付き選択
//!
//! # 設計
//! - レーンは task_id のみを保持（状態・payload は TaskStore が正本）
//! - レーン内は FIFO
//! - レーン間は smooth weighted round-robin（重み 6:3 なら 2:1 で配る、空でないレーンは飢餓しない）
//! - 空のときは Notify で待機（busy polling しない）

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::config::QueueSpec;
use crate::domain::{SpindleError, TaskId};

/// A task handed out by `dequeue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub queue: String,
    pub task_id: TaskId,
}

#[derive(Debug)]
struct Lane {
    name: String,
    weight: i64,
    /// Smooth-WRR credit.
    current: i64,
    ready: VecDeque<TaskId>,
}

#[derive(Debug, Default)]
struct RouterState {
    lanes: Vec<Lane>,
    /// Every task currently sitting in some lane.
    members: HashSet<TaskId>,
}

impl RouterState {
    fn lane_mut(&mut self, queue: &str) -> Option<&mut Lane> {
        self.lanes.iter_mut().find(|lane| lane.name == queue)
    }

    fn pick(&mut self) -> Option<Ready> {
        let total: i64 = self
            .lanes
            .iter()
            .filter(|lane| !lane.ready.is_empty())
            .map(|lane| lane.weight)
            .sum();
        if total == 0 {
            return None;
        }

        let mut best: Option<usize> = None;
        for i in 0..self.lanes.len() {
            if self.lanes[i].ready.is_empty() {
                continue;
            }
            self.lanes[i].current += self.lanes[i].weight;
            // Ties go to the lane declared first.
            if best.is_none_or(|b| self.lanes[i].current > self.lanes[b].current) {
                best = Some(i);
            }
        }

        let lane = &mut self.lanes[best?];
        lane.current -= total;
        let task_id = lane.ready.pop_front()?;
        let queue = lane.name.clone();
        self.members.remove(&task_id);
        Some(Ready { queue, task_id })
    }
}

pub struct QueueRouter {
    specs: Vec<QueueSpec>,
    state: Mutex<RouterState>,
    notify: Notify,
    closed: AtomicBool,
}

impl QueueRouter {
    /// `specs` must already be validated (unique names, weight > 0).
    pub fn new(specs: &[QueueSpec]) -> Self {
        let lanes = specs
            .iter()
            .map(|spec| Lane {
                name: spec.name.clone(),
                weight: i64::from(spec.weight),
                current: 0,
                ready: VecDeque::new(),
            })
            .collect();
        Self {
            specs: specs.to_vec(),
            state: Mutex::new(RouterState {
                lanes,
                members: HashSet::new(),
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn spec(&self, queue: &str) -> Option<&QueueSpec> {
        self.specs.iter().find(|spec| spec.name == queue)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.spec(queue).is_some()
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|spec| spec.name.as_str())
    }

    /// Append `task_id` to its lane.
    ///
    /// Returns `Ok(false)` if the task is already in a lane.
    pub async fn enqueue(&self, queue: &str, task_id: TaskId) -> Result<bool, SpindleError> {
        {
            let mut state = self.state.lock().await;
            if state.members.contains(&task_id) {
                return Ok(false);
            }
            let lane = state
                .lane_mut(queue)
                .ok_or_else(|| SpindleError::UnknownQueue(queue.to_string()))?;
            lane.ready.push_back(task_id);
            state.members.insert(task_id);
        }
        debug!(queue, %task_id, "task ready");
        // Notify outside the lock
        self.notify.notify_one();
        Ok(true)
    }

    /// Take the next ready task without waiting.
    pub async fn try_dequeue(&self) -> Option<Ready> {
        self.state.lock().await.pick()
    }

    /// Wait for the next ready task. Returns `None` once the router is closed.
    pub async fn dequeue(&self) -> Option<Ready> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between is not missed.
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(ready) = self.try_dequeue().await {
                return Some(ready);
            }
            notified.await;
        }
    }

    /// Wake every waiter and make `dequeue` return `None` from now on.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn ready_len(&self, queue: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state
            .lanes
            .iter()
            .find(|lane| lane.name == queue)
            .map(|lane| lane.ready.len())
    }

    pub async fn total_ready(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn contains(&self, task_id: TaskId) -> bool {
        self.state.lock().await.members.contains(&task_id)
    }

    /// Drop every lane's contents before rebuilding from the store.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        for lane in &mut state.lanes {
            lane.ready.clear();
            lane.current = 0;
        }
        state.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use ulid::Ulid;

    fn specs(weights: &[(&str, u32)]) -> Vec<QueueSpec> {
        weights
            .iter()
            .map(|(name, weight)| QueueSpec::new(*name, *weight))
            .collect()
    }

    fn new_id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn fifo_within_a_lane() {
        let router = QueueRouter::new(&specs(&[("default", 1)]));
        let ids: Vec<TaskId> = (0..5).map(|_| new_id()).collect();
        for id in &ids {
            router.enqueue("default", *id).await.unwrap();
        }

        let mut out = Vec::new();
        while let Some(ready) = router.try_dequeue().await {
            out.push(ready.task_id);
        }
        assert_eq!(out, ids);
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected() {
        let router = QueueRouter::new(&specs(&[("default", 1)]));
        let err = router.enqueue("missing", new_id()).await.unwrap_err();
        assert!(matches!(err, SpindleError::UnknownQueue(q) if q == "missing"));
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_ignored() {
        let router = QueueRouter::new(&specs(&[("default", 1), ("low", 1)]));
        let id = new_id();
        assert!(router.enqueue("default", id).await.unwrap());
        assert!(!router.enqueue("low", id).await.unwrap());
        assert_eq!(router.total_ready().await, 1);
        assert_eq!(router.ready_len("low").await, Some(0));
    }

    #[tokio::test]
    async fn weights_split_attention_under_saturation() {
        let router = QueueRouter::new(&specs(&[("critical", 6), ("default", 3)]));
        for _ in 0..300 {
            router.enqueue("critical", new_id()).await.unwrap();
            router.enqueue("default", new_id()).await.unwrap();
        }

        let mut critical = 0;
        let mut default = 0;
        for _ in 0..90 {
            match router.try_dequeue().await.unwrap().queue.as_str() {
                "critical" => critical += 1,
                _ => default += 1,
            }
        }
        assert_eq!((critical, default), (60, 30));
    }

    #[tokio::test]
    async fn low_weight_lane_is_not_starved() {
        let router = QueueRouter::new(&specs(&[("critical", 6), ("default", 3), ("low", 1)]));
        for _ in 0..50 {
            router.enqueue("critical", new_id()).await.unwrap();
            router.enqueue("default", new_id()).await.unwrap();
            router.enqueue("low", new_id()).await.unwrap();
        }

        let served: Vec<String> = {
            let mut v = Vec::new();
            for _ in 0..10 {
                v.push(router.try_dequeue().await.unwrap().queue);
            }
            v
        };
        assert_eq!(served.iter().filter(|q| *q == "low").count(), 1);
        assert_eq!(served.iter().filter(|q| *q == "critical").count(), 6);
    }

    #[tokio::test]
    async fn empty_lanes_are_skipped() {
        let router = QueueRouter::new(&specs(&[("critical", 6), ("default", 3)]));
        let id = new_id();
        router.enqueue("default", id).await.unwrap();
        let ready = router.try_dequeue().await.unwrap();
        assert_eq!(ready, Ready { queue: "default".into(), task_id: id });
        assert!(router.try_dequeue().await.is_none());
    }

    #[tokio::test]
    async fn enqueue_wakes_blocked_dequeue() {
        let router = Arc::new(QueueRouter::new(&specs(&[("default", 1)])));
        let waiter = tokio::spawn({
            let router = router.clone();
            async move { router.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = new_id();
        router.enqueue("default", id).await.unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ready.map(|r| r.task_id), Some(id));
    }

    #[tokio::test]
    async fn close_releases_waiters() {
        let router = Arc::new(QueueRouter::new(&specs(&[("default", 1)])));
        let waiter = tokio::spawn({
            let router = router.clone();
            async move { router.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        router.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
