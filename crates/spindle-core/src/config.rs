//! Service configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! concurrency = 10
//! handler_timeout_ms = 30000
//!
//! [[queues]]
//! name = "critical"
//! weight = 6
//!
//! [[queues]]
//! name = "default"
//! weight = 3
//! max_pending = 10000
//!
//! [store]
//! path = "spindle.db"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DEFAULT_QUEUE;
use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A named queue and its share of dispatcher attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,

    /// Relative weight; a queue with weight 6 is served twice as often as one with 3.
    pub weight: u32,

    /// Maximum Pending + Scheduled + Retry tasks; `None` = unbounded.
    #[serde(default)]
    pub max_pending: Option<usize>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
            max_pending: None,
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = Some(max_pending);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_interval_ms")]
    pub interval_ms: u64,

    /// Extra time past the handler timeout before an Active task counts as orphaned.
    #[serde(default = "default_lease_grace_ms")]
    pub lease_grace_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reaper_interval_ms(),
            lease_grace_ms: default_lease_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_gc_interval_ms")]
    pub interval_ms: u64,

    /// How long Completed tasks stay inspectable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_gc_interval_ms(),
            retention_secs: default_retention_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; `None` keeps everything in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpindleConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// Retry budget for submissions that do not set one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    #[serde(default = "default_queues")]
    pub queues: Vec<QueueSpec>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub reaper: ReaperConfig,

    #[serde(default)]
    pub gc: GcConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

fn default_concurrency() -> usize {
    10
}

fn default_handler_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    25
}

fn default_queues() -> Vec<QueueSpec> {
    vec![
        QueueSpec::new("critical", 6),
        QueueSpec::new(DEFAULT_QUEUE, 3),
        QueueSpec::new("low", 1),
    ]
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_max_delay_ms() -> u64 {
    600_000
}

fn default_reaper_interval_ms() -> u64 {
    5_000
}

fn default_lease_grace_ms() -> u64 {
    30_000
}

fn default_gc_interval_ms() -> u64 {
    60_000
}

fn default_retention_secs() -> u64 {
    86_400
}

impl Default for SpindleConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            handler_timeout_ms: default_handler_timeout_ms(),
            default_max_retries: default_max_retries(),
            queues: default_queues(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            reaper: ReaperConfig::default(),
            gc: GcConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl SpindleConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SpindleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }

    /// Age after which an Active task is considered orphaned.
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms.saturating_add(self.reaper.lease_grace_ms))
    }

    /// Fail fast on anything the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".into());
        }
        if self.handler_timeout_ms == 0 {
            return invalid("handler_timeout_ms must be positive".into());
        }
        if self.scheduler.tick_interval_ms == 0
            || self.reaper.interval_ms == 0
            || self.gc.interval_ms == 0
        {
            return invalid("loop intervals must be positive".into());
        }

        if self.queues.is_empty() {
            return invalid("at least one queue is required".into());
        }
        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.name.trim().is_empty() {
                return invalid("queue names must not be empty".into());
            }
            if !seen.insert(queue.name.as_str()) {
                return invalid(format!("duplicate queue: {}", queue.name));
            }
            if queue.weight == 0 {
                return invalid(format!("queue {} has weight 0", queue.name));
            }
        }
        if !seen.contains(DEFAULT_QUEUE) {
            return invalid(format!("queue {DEFAULT_QUEUE:?} must be configured"));
        }

        let retry = &self.retry;
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return invalid(format!("retry.multiplier must be >= 1, got {}", retry.multiplier));
        }
        let max_jitter = RetryPolicy::max_monotonic_jitter(retry.multiplier);
        if !(0.0..=max_jitter).contains(&retry.jitter) {
            return invalid(format!(
                "retry.jitter must be within [0, {max_jitter:.3}] for multiplier {}",
                retry.multiplier
            ));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return invalid("retry.max_delay_ms must be >= retry.base_delay_ms".into());
        }

        Ok(())
    }
}
