//! Storage retry - ループ内でのストレージ障害の扱い
//!
//! ストレージエラーでループを落とさず、上限付きの指数バックオフで再試行します。
//! shutdown が来たら諦めて `None` を返します（タスクは Active のまま残り、
//! 次回起動時の回収に任せる）。

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::domain::StoreError;

const INITIAL_DELAY: Duration = Duration::from_millis(50);
const MAX_DELAY: Duration = Duration::from_secs(5);

pub(crate) async fn retry_storage<T, F, Fut>(
    what: &'static str,
    shutdown: &mut watch::Receiver<bool>,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = INITIAL_DELAY;
    loop {
        match op().await {
            Ok(value) => return Some(value),
            Err(err) => {
                warn!(operation = what, error = %err, retry_in_ms = delay.as_millis() as u64, "storage error");
            }
        }

        if *shutdown.borrow() {
            return None;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return None;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(MAX_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let (_tx, mut rx) = watch::channel(false);
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let value = retry_storage("get", &mut rx, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(StoreError::Unavailable("disk".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(value, Some(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            retry_storage::<(), _, _>("put", &mut rx, || async {
                Err(StoreError::Unavailable("disk".into()))
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send_replace(true);
        assert_eq!(handle.await.unwrap(), None);
    }
}
