#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_core::app::Client;
use spindle_core::config::SpindleConfig;
use spindle_core::domain::{HandlerError, TaskId, TaskRecord};
use spindle_core::typed::{Handler, Task};

/// Millisecond loops and a flat 10ms retry delay.
pub fn fast_config() -> SpindleConfig {
    let mut config = SpindleConfig::default();
    config.concurrency = 4;
    config.handler_timeout_ms = 2_000;
    config.scheduler.tick_interval_ms = 10;
    config.retry.base_delay_ms = 10;
    config.retry.multiplier = 1.0;
    config.retry.jitter = 0.0;
    config.retry.max_delay_ms = 10;
    config.reaper.interval_ms = 50;
    config
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
}

impl Task for Email {
    const TYPE: &'static str = "email:delivery";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Numbered {
    pub n: u32,
    pub label: String,
}

impl Task for Numbered {
    const TYPE: &'static str = "test:numbered";
}

#[derive(Default)]
pub struct EmailHandler;

#[async_trait]
impl Handler<Email> for EmailHandler {
    async fn handle(&self, _task: Email) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }
}

/// Records execution order and fails every run when `fail` is set.
#[derive(Clone, Default)]
pub struct Recorder {
    pub runs: Arc<Mutex<Vec<Numbered>>>,
    pub in_flight: Arc<Mutex<HashMap<u32, usize>>>,
    pub overlaps: Arc<Mutex<usize>>,
    pub fail: bool,
    pub work: Duration,
}

impl Recorder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(work: Duration) -> Self {
        Self {
            work,
            ..Self::default()
        }
    }

    pub fn runs(&self) -> Vec<Numbered> {
        self.runs.lock().unwrap().clone()
    }

    pub fn overlaps(&self) -> usize {
        *self.overlaps.lock().unwrap()
    }
}

#[async_trait]
impl Handler<Numbered> for Recorder {
    async fn handle(&self, task: Numbered) -> Result<(), HandlerError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(task.n).or_default();
            *count += 1;
            if *count > 1 {
                *self.overlaps.lock().unwrap() += 1;
            }
        }
        self.runs.lock().unwrap().push(task.clone());
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(&task.n) {
            *count -= 1;
        }

        if self.fail {
            Err(HandlerError::retryable(format!("boom {}", task.n)))
        } else {
            Ok(())
        }
    }
}

/// Poll until `pred` holds for the task or `timeout` elapses.
pub async fn wait_for(
    client: &Client,
    id: TaskId,
    timeout: Duration,
    pred: impl Fn(&TaskRecord) -> bool,
) -> TaskRecord {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let record = client.status(id).await.unwrap().expect("task exists");
        if pred(&record) {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on {id}: last state {}",
            record.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
