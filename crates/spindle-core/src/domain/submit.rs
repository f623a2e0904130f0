//! Submission options and the handle returned to submitters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SpindleError, TaskId, TaskState};

pub const DEFAULT_QUEUE: &str = "default";

/// Options for `Client::submit`.
///
/// `delay` and `eta` are mutually exclusive; leaving both unset means
/// "run as soon as a worker is free".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub queue: Option<String>,
    pub delay: Option<Duration>,
    pub eta: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Process in `delay` from now.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Process at `eta`.
    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(DEFAULT_QUEUE)
    }

    /// Resolve the earliest run time, or `None` for immediate dispatch.
    ///
    /// A zero delay or an ETA that is not in the future counts as immediate.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, SpindleError> {
        match (self.delay, self.eta) {
            (Some(_), Some(_)) => Err(SpindleError::InvalidOptions(
                "delay and eta are mutually exclusive".to_string(),
            )),
            (Some(delay), None) if delay.is_zero() => Ok(None),
            (Some(delay), None) => {
                let delay = chrono::Duration::from_std(delay).map_err(|_| {
                    SpindleError::InvalidOptions(format!("delay out of range: {delay:?}"))
                })?;
                Ok(Some(now + delay))
            }
            (None, Some(eta)) if eta <= now => Ok(None),
            (None, Some(eta)) => Ok(Some(eta)),
            (None, None) => Ok(None),
        }
    }
}

/// Returned synchronously from submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: TaskId,
    pub queue: String,
    pub state: TaskState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_default_queue_and_immediate() {
        let now = Utc::now();
        let opts = SubmitOptions::new();
        assert_eq!(opts.queue_name(), "default");
        assert_eq!(opts.run_at(now).unwrap(), None);
    }

    #[test]
    fn zero_delay_is_immediate() {
        let now = Utc::now();
        let opts = SubmitOptions::new().delay(Duration::ZERO);
        assert_eq!(opts.run_at(now).unwrap(), None);
    }

    #[test]
    fn delay_is_added_to_now() {
        let now = Utc::now();
        let opts = SubmitOptions::new().delay(Duration::from_secs(3));
        assert_eq!(
            opts.run_at(now).unwrap(),
            Some(now + chrono::Duration::seconds(3))
        );
    }

    #[test]
    fn past_eta_is_immediate() {
        let now = Utc::now();
        let opts = SubmitOptions::new().eta(now - chrono::Duration::seconds(1));
        assert_eq!(opts.run_at(now).unwrap(), None);
    }

    #[test]
    fn delay_and_eta_conflict() {
        let now = Utc::now();
        let opts = SubmitOptions::new()
            .delay(Duration::from_secs(1))
            .eta(now);
        assert!(matches!(
            opts.run_at(now),
            Err(SpindleError::InvalidOptions(_))
        ));
    }
}
