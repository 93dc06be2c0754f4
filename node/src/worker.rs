//! Background workers: notification dispatch and rate cache eviction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use microbank_fx::CacheSweep;
use microbank_ledger::{Notification, NotifyError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Final hop for a serialized notification (mail gateway, broker, ...).
#[async_trait]
pub trait MailDelivery: Send + Sync {
    async fn deliver(&self, recipient: &str, payload: &str) -> Result<(), NotifyError>;
}

/// Delivery that writes each message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMailDelivery;

#[async_trait]
impl MailDelivery for LoggingMailDelivery {
    async fn deliver(&self, recipient: &str, payload: &str) -> Result<(), NotifyError> {
        info!(recipient, payload, "Mail delivered");
        Ok(())
    }
}

/// Drain the notification queue until every sender is gone.
///
/// Failed deliveries are logged and dropped; there is no retry.
pub async fn run_dispatcher(
    mut queue: mpsc::Receiver<Notification>,
    delivery: Arc<dyn MailDelivery>,
) -> usize {
    let mut delivered = 0;

    while let Some(notification) = queue.recv().await {
        let payload = match serde_json::to_string(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode notification");
                continue;
            }
        };

        match delivery.deliver(&notification.recipient, &payload).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                recipient = %notification.recipient,
                error = %e,
                "Notification delivery failed"
            ),
        }
    }

    info!(delivered, "Notification dispatcher stopped");
    delivered
}

/// Periodically drop expired rates until `shutdown` flips to true.
///
/// A failed sweep is logged and retried on the next tick.
pub async fn run_cache_eviction(
    cache: Arc<dyn CacheSweep>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => match cache.sweep().await {
                Ok(evicted) => debug!(evicted, "Rate cache swept"),
                Err(e) => warn!(error = %e, "Rate cache sweep failed"),
            },
            _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => break,
        }
    }
}
