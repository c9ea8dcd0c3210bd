use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handler::TransferHandler;

/// Spawns the background task that aborts idle transfers.
///
/// Checks four times per `idle_timeout` (at most once per minute, at least
/// once per second). Returns `None` when idle expiry is disabled.
pub fn spawn_reaper(
    handler: Arc<TransferHandler>,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let idle_timeout = handler.config().idle_timeout;
    if idle_timeout.is_zero() {
        return None;
    }
    let period = (idle_timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = handler.expire_idle().await;
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "idle transfers reaped");
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerConfig;
    use crate::testing::*;
    use ota_protocol::TransferStatus;

    #[tokio::test(start_paused = true)]
    async fn reaper_aborts_idle_transfer() {
        let mut h = harness(HandlerConfig {
            idle_timeout: Duration::from_secs(40),
            ..HandlerConfig::default()
        });
        h.handler.handle(start("slow", 10)).await.unwrap();
        h.drain_events();

        let cancel = CancellationToken::new();
        let task = spawn_reaper(Arc::clone(&h.handler), cancel.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(
            h.handler.table().retired_status(&"slow".into()).await,
            Some(TransferStatus::Aborted)
        );
        let events = h.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "idle timeout");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn zero_timeout_disables_reaper() {
        let h = harness(HandlerConfig {
            idle_timeout: Duration::ZERO,
            ..HandlerConfig::default()
        });
        assert!(spawn_reaper(Arc::clone(&h.handler), CancellationToken::new()).is_none());
    }
}
