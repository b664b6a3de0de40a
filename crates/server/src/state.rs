//! Shared server state and the boot sequence.

use std::sync::Arc;

use tether_client::{
    CacheTierManager, FetchClient, FetchConfig, Intermediary, LogNotifier, Network, NotificationDispatcher,
    RetryPolicy, SyncCoordinator, TimerRegistrar,
};
use tether_core::{AppConfig, CacheDb, Error};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

/// Maps proxied paths onto the upstream origins.
///
/// A path under the API base path goes to the API origin; everything else
/// goes to the application origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    origin: Url,
    api_base: Url,
}

impl Upstream {
    pub fn new(origin: Url, api_base: Url) -> Self {
        Self { origin, api_base }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let api_base = config.api_base_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self::new(origin, api_base))
    }

    pub fn map(&self, path: &str, query: Option<&str>) -> Url {
        let prefix = self.api_base.path().trim_end_matches('/');
        let is_api = prefix.is_empty()
            || path == prefix
            || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'));

        let mut url = if is_api { self.api_base.clone() } else { self.origin.clone() };
        url.set_path(path);
        url.set_query(query);
        url.set_fragment(None);
        url
    }
}

#[derive(Clone)]
pub struct AppState {
    pub intermediary: Intermediary,
    pub notifications: LogNotifier,
    pub upstream: Upstream,
    /// Largest request body accepted from clients.
    pub max_body_bytes: usize,
}

impl AppState {
    /// Wire every component from configuration.
    ///
    /// Returns the state and the receiving end of the replay triggers, which
    /// the sync loop consumes.
    pub async fn boot(config: &AppConfig) -> Result<(Self, UnboundedReceiver<String>), Error> {
        let db = CacheDb::open(&config.db_path).await?;
        let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from(config))?);

        let notifications = LogNotifier::new(config.notification_buffer);
        let dispatcher = NotificationDispatcher::new(Arc::new(notifications.clone()));
        let (registrar, triggers) = TimerRegistrar::new(config.sync_interval());

        let coordinator = SyncCoordinator::new(db.clone(), network.clone(), dispatcher)
            .with_registrar(Arc::new(registrar))
            .with_policy(RetryPolicy::from_config(config));
        let tiers = CacheTierManager::from_config(db, network.clone(), config)?;
        let intermediary = Intermediary::from_config(config, tiers, coordinator, network)?;

        let state = Self {
            intermediary,
            notifications,
            upstream: Upstream::from_config(config)?,
            max_body_bytes: config.max_bytes,
        };
        Ok((state, triggers))
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        self.intermediary.coordinator()
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        self.coordinator().dispatcher()
    }

    /// Install and activate the current cache tiers, then schedule a replay
    /// if mutations survived a restart.
    pub async fn install(&self) -> Result<(), Error> {
        let tiers = self.intermediary.tiers();
        let installed = tiers.initialize().await?;
        let retired = tiers.cleanup().await?;
        tracing::info!(
            static_tier = %tiers.names().static_tier(),
            installed,
            retired = retired.len(),
            "cache tiers activated"
        );

        let pending = self.coordinator().pending_count().await?;
        if pending > 0 {
            tracing::info!(pending, "queued mutations found at startup");
            self.coordinator().request_sync().await;
        }
        Ok(())
    }
}
