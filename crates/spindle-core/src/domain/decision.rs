//! Decision model: next action determination after an attempt.
//!
//! The Decider is a pure function of the task record and the attempt's
//! outcome (plus jitter); applying the decision to the store is the worker's
//! job.

use std::time::Duration;

use super::{Outcome, TaskRecord};
use crate::queue::RetryPolicy;

/// The next action to take for a task after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Retry the task after a delay.
    Retry { delay: Duration, reason: String },

    /// Move the task to the dead-letter set.
    DeadLetter { reason: String },
}

pub trait Decider: Send + Sync {
    /// Decide what happens to `task` (still Active) given a failed `outcome`.
    fn decide(&self, task: &TaskRecord, outcome: &Outcome) -> Decision;
}

/// Retry-budget decider with exponential backoff:
/// - Non-retryable outcome -> dead letter
/// - retry_count < max_retries -> retry after `RetryPolicy::next_delay(retry_count)`
/// - otherwise -> dead letter
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, outcome: &Outcome) -> Decision {
        let error = outcome
            .error_message()
            .unwrap_or_else(|| "unknown failure".to_string());

        if !outcome.is_retryable() {
            return Decision::DeadLetter {
                reason: format!("non-retryable: {error}"),
            };
        }

        if task.retries_exhausted() {
            return Decision::DeadLetter {
                reason: format!(
                    "retries exhausted ({}/{}): {error}",
                    task.retry_count, task.max_retries
                ),
            };
        }

        let delay = self.retry_policy.next_delay(task.retry_count);
        Decision::Retry {
            delay,
            reason: error,
        }
    }
}
