//! Durable queue and sync coordination.
//!
//! A mutation that could not reach the network is persisted as a
//! [`QueuedMutation`] and a deferred-retry trigger is registered under
//! [`SYNC_TAG`]. When the host fires the trigger, [`SyncCoordinator::replay`]
//! re-issues every eligible record sequentially in enqueue order:
//!
//! - 2xx: the record and its bookkeeping are deleted and one "synced"
//!   notification is dispatched by whichever replay actually removed it.
//! - anything else: the record stays as it was; its [`ReplayState`] gets the
//!   failure, the next eligible time and, once the attempt budget is spent,
//!   the parked flag.

pub mod registrar;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tether_core::{AppConfig, CacheDb, Error, HttpRequest, PendingMutation, QueuedMutation, ReplayState};
use tokio::sync::Mutex;
use url::Url;

use crate::fetch::Network;
use crate::notify::NotificationDispatcher;

pub use registrar::{TimerRegistrar, drive};

/// Deferred-retry tag registered for queued submissions.
pub const SYNC_TAG: &str = "sync-complaints";

/// Host primitive that schedules a replay trigger for a tag.
#[async_trait]
pub trait SyncRegistrar: Send + Sync {
    async fn register(&self, tag: &str) -> Result<(), Error>;
}

/// Capped exponential backoff with an attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Failed attempts after which a record is parked.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_secs(30), max_delay: Duration::from_secs(3600), max_attempts: 8 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
            max_attempts: config.retry_max_attempts,
        }
    }

    /// Delay before the next attempt after `attempts` failures.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Ids confirmed and removed by this pass.
    pub synced: Vec<String>,
    /// Ids that failed and remain eligible for a later trigger.
    pub failed: Vec<String>,
    /// Records skipped because their backoff has not elapsed.
    pub deferred: usize,
    /// Records skipped or newly parked.
    pub parked: usize,
}

impl ReplayReport {
    /// Whether a later trigger could make progress.
    pub fn has_pending(&self) -> bool {
        !self.failed.is_empty() || self.deferred > 0
    }
}

/// A queued mutation together with its replay bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub mutation: QueuedMutation,
    pub replay: Option<ReplayState>,
}

/// Owner of the durable queue.
#[derive(Clone)]
pub struct SyncCoordinator {
    db: CacheDb,
    network: Arc<dyn Network>,
    registrar: Option<Arc<dyn SyncRegistrar>>,
    dispatcher: NotificationDispatcher,
    policy: RetryPolicy,
    replay_lock: Arc<Mutex<()>>,
}

impl SyncCoordinator {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, dispatcher: NotificationDispatcher) -> Self {
        Self {
            db,
            network,
            registrar: None,
            dispatcher,
            policy: RetryPolicy::default(),
            replay_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn SyncRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Persist a mutation and ask the host for a replay trigger.
    ///
    /// Store failures are fatal and surface as [`Error::PersistenceFailed`].
    pub async fn enqueue(&self, pending: PendingMutation) -> Result<QueuedMutation, Error> {
        let queued = self.db.enqueue_request(pending).await.map_err(|e| Error::PersistenceFailed(e.to_string()))?;
        tracing::info!(id = %queued.id, url = %queued.url, "mutation queued for replay");
        self.request_sync().await;
        Ok(queued)
    }

    /// Register a deferred-retry trigger. Lack of support is not an error.
    pub async fn request_sync(&self) {
        match &self.registrar {
            Some(registrar) => {
                if let Err(e) = registrar.register(SYNC_TAG).await {
                    tracing::warn!(tag = SYNC_TAG, "deferred retry registration failed: {e}");
                }
            }
            None => tracing::debug!(tag = SYNC_TAG, "no deferred retry support, replay waits for a manual trigger"),
        }
    }

    /// Queued mutations in enqueue order, with their replay bookkeeping.
    pub async fn queue(&self) -> Result<Vec<QueueEntry>, Error> {
        let mut states = self.replay_states().await?;
        let entries = self
            .db
            .list_requests()
            .await?
            .into_iter()
            .map(|mutation| {
                let replay = states.remove(&mutation.id);
                QueueEntry { mutation, replay }
            })
            .collect();
        Ok(entries)
    }

    pub async fn pending_count(&self) -> Result<u64, Error> {
        self.db.pending_count().await
    }

    /// Make a parked or backed-off record eligible for the next replay.
    pub async fn release(&self, id: &str) -> Result<bool, Error> {
        let released = self.db.release_request(id).await?;
        if released {
            tracing::info!(id, "queued mutation released");
        }
        Ok(released)
    }

    /// Replay every eligible queued mutation, one at a time, in enqueue order.
    pub async fn replay(&self) -> Result<ReplayReport, Error> {
        let _guard = self.replay_lock.lock().await;
        let mut states = self.replay_states().await?;
        let mut report = ReplayReport::default();

        for mutation in self.db.list_requests().await? {
            let previous = states.remove(&mutation.id);
            let now = chrono::Utc::now().timestamp_millis();
            if let Some(state) = &previous {
                if state.parked {
                    report.parked += 1;
                    continue;
                }
                if state.next_attempt_at > now {
                    report.deferred += 1;
                    continue;
                }
            }

            match self.reissue(&mutation).await {
                Ok(status) => {
                    if self.db.delete_request(&mutation.id).await? {
                        tracing::info!(id = %mutation.id, status, "queued mutation synced");
                        self.dispatcher.synced(&mutation).await;
                        report.synced.push(mutation.id);
                    }
                }
                Err(reason) => {
                    let attempts = previous.as_ref().map_or(0, |s| s.attempts).saturating_add(1);
                    let parked = self.policy.exhausted(attempts);
                    let delay = i64::try_from(self.policy.delay_for(attempts).as_millis()).unwrap_or(i64::MAX);
                    let state = ReplayState {
                        id: mutation.id.clone(),
                        attempts,
                        last_attempt_at: now,
                        next_attempt_at: now.saturating_add(delay),
                        last_error: Some(reason.clone()),
                        parked,
                    };
                    // A concurrent replay may have confirmed the record meanwhile.
                    if !self.db.put_replay_state(&state).await? {
                        continue;
                    }
                    if parked {
                        tracing::warn!(id = %mutation.id, attempts, "replay budget exhausted, record parked: {reason}");
                        report.parked += 1;
                    } else {
                        tracing::warn!(id = %mutation.id, attempts, "replay failed: {reason}");
                        report.failed.push(mutation.id);
                    }
                }
            }
        }

        tracing::info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            deferred = report.deferred,
            parked = report.parked,
            "replay pass complete"
        );
        Ok(report)
    }

    /// Re-issue a captured mutation. Only a 2xx answer confirms it.
    async fn reissue(&self, mutation: &QueuedMutation) -> Result<u16, String> {
        let url = Url::parse(&mutation.url).map_err(|e| format!("invalid url {}: {e}", mutation.url))?;
        let mut request = HttpRequest::new(&mutation.method, url).with_body(mutation.body.clone());
        for (name, value) in &mutation.headers {
            request.insert_header(name, value);
        }

        let response = self.network.send(&request).await.map_err(|e| e.to_string())?;
        if response.is_success() { Ok(response.status) } else { Err(format!("upstream answered {}", response.status)) }
    }

    async fn replay_states(&self) -> Result<HashMap<String, ReplayState>, Error> {
        let states = self.db.list_replay_states().await?;
        Ok(states.into_iter().map(|state| (state.id.clone(), state)).collect())
    }
}
