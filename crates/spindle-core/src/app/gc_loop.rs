//! GcLoop - 完了タスクのガベージコレクション
//!
//! Completed のタスクは retention の間だけ `status` で参照でき、その後削除されます。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::SpindleError;
use crate::ports::{Clock, TaskStore};

pub struct GcLoop {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: Duration,
}

impl GcLoop {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            retention,
            interval,
        }
    }

    /// One pass. Returns the number of purged tasks.
    pub async fn collect(&self) -> Result<usize, SpindleError> {
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = self.clock.now().checked_sub_signed(retention) else {
            return Ok(0);
        };
        let purged = self.store.purge_completed(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "purged completed tasks");
        } else {
            debug!(%cutoff, "nothing to purge");
        }
        Ok(purged)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.collect().await {
                        warn!(error = %err, "gc pass failed; retrying next interval");
                    }
                }
            }
        }
        info!("gc stopped");
    }
}
