//! Cache tier manager.
//!
//! Owns the two versioned tiers of a deployment, `<app>-static-<version>` and
//! `<app>-dynamic-<version>`:
//!
//! - **install** ([`CacheTierManager::initialize`]): fetch every critical asset
//!   and write them to the static tier as one transaction. One failed fetch
//!   aborts the whole install and leaves no tier behind.
//! - **activate** ([`CacheTierManager::cleanup`]): delete every tier of this
//!   application whose version differs from the current one. Ownership comes
//!   from the app recorded with each tier, so tiers of other applications
//!   sharing the store are never touched even when their names overlap.

use std::sync::Arc;

use futures_util::future::try_join_all;
use tether_core::cache::hash::compute_cache_key;
use tether_core::{AppConfig, CacheDb, CachedResponse, Error, HttpRequest, HttpResponse, TierInfo};
use url::Url;

use crate::fetch::Network;
use crate::router::Tier;

/// Tier naming for one application deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierNames {
    pub app: String,
    pub version: String,
}

impl TierNames {
    pub fn new(app: impl Into<String>, version: impl Into<String>) -> Self {
        Self { app: app.into(), version: version.into() }
    }

    pub fn static_tier(&self) -> String {
        format!("{}-static-{}", self.app, self.version)
    }

    pub fn dynamic_tier(&self) -> String {
        format!("{}-dynamic-{}", self.app, self.version)
    }

    pub fn name(&self, tier: Tier) -> String {
        match tier {
            Tier::Static => self.static_tier(),
            Tier::Dynamic => self.dynamic_tier(),
        }
    }

    /// Whether a tier name follows this application's naming, whatever its version.
    pub fn matches(&self, name: &str) -> bool {
        [format!("{}-static-", self.app), format!("{}-dynamic-", self.app)]
            .iter()
            .any(|prefix| name.strip_prefix(prefix.as_str()).is_some_and(|version| !version.is_empty()))
    }

    /// Whether a stored tier belongs to this application.
    ///
    /// A tier without a recorded owner is judged by its name alone.
    pub fn owns(&self, tier: &TierInfo) -> bool {
        tier.app.as_ref().is_none_or(|app| *app == self.app) && self.matches(&tier.name)
    }

    /// Whether a tier name is one of the current deployment's tiers.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_tier() || name == self.dynamic_tier()
    }
}

/// Manager for the static and dynamic tiers of the current deployment.
#[derive(Clone)]
pub struct CacheTierManager {
    db: CacheDb,
    network: Arc<dyn Network>,
    names: TierNames,
    precache: Arc<[Url]>,
    dynamic_max_entries: Option<usize>,
}

impl CacheTierManager {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, names: TierNames, precache: Vec<Url>) -> Self {
        Self { db, network, names, precache: precache.into(), dynamic_max_entries: None }
    }

    /// Build from application configuration.
    pub fn from_config(db: CacheDb, network: Arc<dyn Network>, config: &AppConfig) -> Result<Self, Error> {
        let precache = config.precache_targets().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let names = TierNames::new(&config.app_name, &config.cache_version);
        Ok(Self::new(db, network, names, precache).with_dynamic_quota(config.dynamic_max_entries))
    }

    /// Cap the dynamic tier at `max_entries`, trimming the oldest on write.
    pub fn with_dynamic_quota(mut self, max_entries: Option<usize>) -> Self {
        self.dynamic_max_entries = max_entries;
        self
    }

    pub fn names(&self) -> &TierNames {
        &self.names
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Install: pre-populate the static tier with the critical assets.
    ///
    /// Fetches run concurrently; the tier is written only once every asset
    /// has answered with a success status. Returns the number of assets
    /// stored.
    pub async fn initialize(&self) -> Result<usize, Error> {
        let tier = self.names.static_tier();
        let fetches = self.precache.iter().map(|url| async move {
            let request = HttpRequest::get(url.clone());
            let response = self.network.send(&request).await.map_err(|e| Error::PrepopulationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            if !response.is_success() {
                return Err(Error::PrepopulationFailed {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            Ok(CachedResponse::capture(&request, &response))
        });

        let entries = try_join_all(fetches).await?;
        self.db.put_entries(&self.names.app, &tier, &entries).await?;

        tracing::info!(tier = %tier, assets = entries.len(), "static tier installed");
        Ok(entries.len())
    }

    /// Activate: remove this application's tiers from previous deployments.
    ///
    /// Also creates the current dynamic tier so that exactly the two current
    /// tiers remain. Returns the names of the deleted tiers.
    pub async fn cleanup(&self) -> Result<Vec<String>, Error> {
        let mut deleted = Vec::new();
        for tier in self.db.list_tiers().await? {
            if self.names.owns(&tier) && !self.names.is_current(&tier.name) && self.db.delete_tier(&tier.name).await? {
                tracing::info!(tier = %tier.name, entries = tier.entries, "retired cache tier");
                deleted.push(tier.name);
            }
        }
        self.db.ensure_tier(&self.names.app, &self.names.dynamic_tier()).await?;
        Ok(deleted)
    }

    /// Look up the response cached in `tier` for the identity of `request`.
    pub async fn lookup(&self, tier: Tier, request: &HttpRequest) -> Result<Option<HttpResponse>, Error> {
        self.lookup_url(tier, &request.method, &request.url).await
    }

    /// Look up the response cached in `tier` for an explicit identity.
    pub async fn lookup_url(&self, tier: Tier, method: &str, url: &Url) -> Result<Option<HttpResponse>, Error> {
        let key = compute_cache_key(method, url);
        let entry = self.db.get_entry(&self.names.name(tier), &key).await?;
        Ok(entry.map(CachedResponse::into_response))
    }

    /// Look up `request` in the dynamic tier, then the static tier.
    pub async fn lookup_any(&self, request: &HttpRequest) -> Result<Option<HttpResponse>, Error> {
        for tier in [Tier::Dynamic, Tier::Static] {
            if let Some(response) = self.lookup(tier, request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Write a response to `tier`, overwriting any entry for the same identity.
    pub async fn store(&self, tier: Tier, request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let name = self.names.name(tier);
        self.db.put_entry(&self.names.app, &name, &CachedResponse::capture(request, response)).await?;

        if tier == Tier::Dynamic
            && let Some(max) = self.dynamic_max_entries
        {
            let trimmed = self.db.trim_tier(&name, max).await?;
            if trimmed > 0 {
                tracing::debug!(tier = %name, trimmed, "dynamic tier over quota");
            }
        }
        Ok(())
    }
}
