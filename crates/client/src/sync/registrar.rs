//! Timer-based deferred-retry registrar and the sync loop that consumes it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::{SYNC_TAG, SyncCoordinator, SyncRegistrar};

/// Schedules one trigger `interval` after registration.
///
/// Registrations made while a trigger is already scheduled coalesce into it.
#[derive(Clone)]
pub struct TimerRegistrar {
    interval: Duration,
    scheduled: Arc<AtomicBool>,
    triggers: UnboundedSender<String>,
}

impl TimerRegistrar {
    /// Create a registrar and the receiving end of its triggers.
    pub fn new(interval: Duration) -> (Self, UnboundedReceiver<String>) {
        let (triggers, rx) = unbounded_channel();
        (Self { interval, scheduled: Arc::new(AtomicBool::new(false)), triggers }, rx)
    }

    /// Deliver a trigger immediately.
    pub fn fire(&self, tag: &str) -> Result<(), Error> {
        self.triggers
            .send(tag.to_string())
            .map_err(|_| Error::Platform("sync loop is not running".into()))
    }
}

#[async_trait]
impl SyncRegistrar for TimerRegistrar {
    async fn register(&self, tag: &str) -> Result<(), Error> {
        if self.triggers.is_closed() {
            return Err(Error::Platform("sync loop is not running".into()));
        }
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let registrar = self.clone();
        let scheduled_tag = tag.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(registrar.interval).await;
            registrar.scheduled.store(false, Ordering::SeqCst);
            if registrar.fire(&scheduled_tag).is_err() {
                tracing::debug!(tag = %scheduled_tag, "trigger dropped, sync loop stopped");
            }
        });
        tracing::debug!(tag, delay_ms = self.interval.as_millis() as u64, "replay trigger scheduled");
        Ok(())
    }
}

/// Run replay passes for each trigger until the trigger source closes.
///
/// A pass that leaves eligible records behind registers another trigger.
pub async fn drive(coordinator: SyncCoordinator, mut triggers: UnboundedReceiver<String>) {
    while let Some(tag) = triggers.recv().await {
        if tag != SYNC_TAG {
            tracing::debug!(tag = %tag, "ignoring unknown sync tag");
            continue;
        }
        match coordinator.replay().await {
            Ok(report) if report.has_pending() => coordinator.request_sync().await,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("replay pass failed: {e}");
                coordinator.request_sync().await;
            }
        }
    }
}
