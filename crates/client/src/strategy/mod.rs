//! The intermediary: classifies each intercepted request and runs the
//! selected strategy against the network and the cache tiers.
//!
//! Cache writes happen off the response path and are registered with the
//! [`Lifetime`]; call [`Intermediary::settle`] before shutting down. Only
//! network-layer failures ([`Error::is_network`]) trigger a cache fallback or
//! the offline queue. An HTTP error status is a response like any other,
//! returned to the caller and never written to a tier.

mod cache_first;
mod mutation;
mod navigation;
mod network_first;

use std::sync::Arc;

use tether_core::{AppConfig, Error, HttpRequest, HttpResponse};
use url::Url;

use crate::fetch::Network;
use crate::lifetime::Lifetime;
use crate::router::{Router, Strategy, Tier};
use crate::sync::SyncCoordinator;
use crate::tiers::CacheTierManager;

/// Documents served to an offline navigation with no cached copy of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationFallbacks {
    pub offline_page: Url,
    pub root: Url,
}

impl NavigationFallbacks {
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let resolve = |target: &str| config.resolve(target).map_err(|e| Error::InvalidUrl(e.to_string()));
        Ok(Self { offline_page: resolve(&config.offline_page)?, root: resolve("/")? })
    }
}

#[derive(Clone)]
pub struct Intermediary {
    router: Router,
    tiers: CacheTierManager,
    coordinator: SyncCoordinator,
    network: Arc<dyn Network>,
    fallbacks: NavigationFallbacks,
    lifetime: Lifetime,
}

impl Intermediary {
    pub fn new(
        router: Router, tiers: CacheTierManager, coordinator: SyncCoordinator, network: Arc<dyn Network>,
        fallbacks: NavigationFallbacks,
    ) -> Self {
        Self { router, tiers, coordinator, network, fallbacks, lifetime: Lifetime::new() }
    }

    /// Build with the standard route table and fallbacks from configuration.
    pub fn from_config(
        config: &AppConfig, tiers: CacheTierManager, coordinator: SyncCoordinator, network: Arc<dyn Network>,
    ) -> Result<Self, Error> {
        let router = Router::from_config(config)?;
        let fallbacks = NavigationFallbacks::from_config(config)?;
        Ok(Self::new(router, tiers, coordinator, network, fallbacks))
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn tiers(&self) -> &CacheTierManager {
        &self.tiers
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Produce a response for an intercepted request, or fail once every
    /// fallback is exhausted.
    pub async fn intercept(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let strategy = self.router.classify(&request);
        tracing::debug!(method = %request.method, url = %request.url, ?strategy, "intercepted");

        match strategy {
            Strategy::OfflineMutation => self.offline_mutation(request).await,
            Strategy::Passthrough => self.network.send(&request).await,
            Strategy::NetworkFirst(tier) => self.network_first(request, tier).await,
            Strategy::CacheFirst(tier) => self.cache_first(request, tier).await,
            Strategy::NavigationFallback => self.navigation(request).await,
        }
    }

    /// Wait for every background cache write and revalidation.
    pub async fn settle(&self) {
        self.lifetime.settle().await;
    }

    /// Store a successful response off the response path.
    fn write_behind(&self, tier: Tier, request: HttpRequest, response: HttpResponse) {
        if !response.is_success() {
            return;
        }
        let tiers = self.tiers.clone();
        self.lifetime.extend(async move {
            if let Err(e) = tiers.store(tier, &request, &response).await {
                tracing::warn!(url = %request.url, ?tier, "cache write failed: {e}");
            }
        });
    }

    /// Cache lookup where a store failure counts as a miss.
    async fn cached(&self, tier: Tier, request: &HttpRequest) -> Option<HttpResponse> {
        match self.tiers.lookup(tier, request).await {
            Ok(hit) => {
                tracing::debug!(url = %request.url, ?tier, hit = hit.is_some(), "cache lookup");
                hit
            }
            Err(e) => {
                tracing::warn!(url = %request.url, ?tier, "cache lookup failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotificationDispatcher, NotificationKind};
    use crate::testing::{FakeNetwork, RecordingNotifier};
    use crate::tiers::TierNames;
    use tether_core::CacheDb;

    const ROOT: &str = "https://portal.test/";
    const OFFLINE: &str = "https://portal.test/offline.html";
    const SCRIPT: &str = "https://portal.test/app.js";
    const SUBMIT: &str = "https://api.portal.test/api/complaints";

    struct Harness {
        db: CacheDb,
        network: Arc<FakeNetwork>,
        notifier: Arc<RecordingNotifier>,
        intermediary: Intermediary,
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    /// An installed intermediary whose static tier holds `precache`.
    async fn harness(precache: &[&str]) -> Harness {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::new());
        network.respond(ROOT, HttpResponse::new(200, "<html>root</html>"));
        network.respond(OFFLINE, HttpResponse::new(200, "<html>offline</html>"));
        network.respond(SCRIPT, HttpResponse::new(200, "console.log(1)"));

        let notifier = Arc::new(RecordingNotifier::new());
        let tiers = CacheTierManager::new(
            db.clone(),
            network.clone(),
            TierNames::new("portal", "v1"),
            precache.iter().copied().map(url).collect(),
        );
        tiers.initialize().await.unwrap();
        tiers.cleanup().await.unwrap();

        let coordinator =
            SyncCoordinator::new(db.clone(), network.clone(), NotificationDispatcher::new(notifier.clone()));
        let router = Router::standard("/api/complaints", url("https://api.portal.test/api"), &["js".to_string()]);
        let fallbacks = NavigationFallbacks { offline_page: url(OFFLINE), root: url(ROOT) };
        let intermediary = Intermediary::new(router, tiers, coordinator, network.clone(), fallbacks);

        Harness { db, network, notifier, intermediary }
    }

    fn navigate(target: &str) -> HttpRequest {
        HttpRequest::get(url(target)).with_header("sec-fetch-mode", "navigate")
    }

    fn json_body(response: &HttpResponse) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[tokio::test]
    async fn test_static_asset_offline_makes_no_network_calls() {
        let h = harness(&[ROOT, OFFLINE, SCRIPT]).await;
        h.network.set_online(false);
        let before = h.network.calls().len();

        let response = h.intermediary.intercept(HttpRequest::get(url(SCRIPT))).await.unwrap();
        h.intermediary.settle().await;

        assert_eq!(response.body, "console.log(1)");
        assert_eq!(h.network.calls().len(), before);
    }

    #[tokio::test]
    async fn test_static_asset_online_revalidates_once() {
        let h = harness(&[ROOT, OFFLINE, SCRIPT]).await;
        h.network.respond(SCRIPT, HttpResponse::new(200, "console.log(2)"));

        let response = h.intermediary.intercept(HttpRequest::get(url(SCRIPT))).await.unwrap();
        assert_eq!(response.body, "console.log(1)");
        h.intermediary.settle().await;

        assert_eq!(h.network.calls_to(SCRIPT), 2);
        let refreshed = h.intermediary.intercept(HttpRequest::get(url(SCRIPT))).await.unwrap();
        assert_eq!(refreshed.body, "console.log(2)");
        h.intermediary.settle().await;
    }

    #[tokio::test]
    async fn test_static_asset_miss_fetches_and_writes_through() {
        let h = harness(&[ROOT]).await;
        let request = HttpRequest::get(url(SCRIPT));

        let response = h.intermediary.intercept(request.clone()).await.unwrap();
        h.intermediary.settle().await;

        assert_eq!(response.status, 200);
        assert!(h.intermediary.tiers().lookup(Tier::Static, &request).await.unwrap().is_some());

        h.network.set_online(false);
        let missing = h.intermediary.intercept(HttpRequest::get(url("https://portal.test/other.js"))).await;
        assert!(matches!(missing, Err(Error::NetworkUnavailable(_))));
    }

    #[tokio::test]
    async fn test_api_read_falls_back_to_cache() {
        let h = harness(&[ROOT]).await;
        let list = "https://api.portal.test/api/complaints?status=open";
        h.network.respond(list, HttpResponse::new(200, r#"[{"id":1}]"#));

        let online = h.intermediary.intercept(HttpRequest::get(url(list))).await.unwrap();
        h.intermediary.settle().await;
        h.network.set_online(false);
        let offline = h.intermediary.intercept(HttpRequest::get(url(list))).await.unwrap();

        assert_eq!(offline, online);
        let uncached = h.intermediary.intercept(HttpRequest::get(url(SUBMIT))).await;
        assert!(matches!(uncached, Err(Error::NetworkUnavailable(_))));
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_cached() {
        let h = harness(&[ROOT]).await;
        let detail = "https://api.portal.test/api/complaints/9";
        h.network.respond(detail, HttpResponse::new(500, "boom"));

        let response = h.intermediary.intercept(HttpRequest::get(url(detail))).await.unwrap();
        h.intermediary.settle().await;

        assert_eq!(response.status, 500);
        assert!(h.intermediary.tiers().lookup(Tier::Dynamic, &HttpRequest::get(url(detail))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_submission_is_queued_and_synced() {
        let h = harness(&[ROOT]).await;
        h.network.set_online(false);
        let submission = HttpRequest::new("POST", url(SUBMIT))
            .with_header("content-type", "application/json")
            .with_body(r#"{"subject":"Streetlight out"}"#);

        let response = h.intermediary.intercept(submission).await.unwrap();

        assert_eq!(response.status, 202);
        let body = json_body(&response);
        assert_eq!(body["success"], true);
        assert_eq!(body["offline"], true);
        let offline_id = body["offlineId"].as_str().unwrap().to_string();
        assert!(offline_id.starts_with("offline-"));

        let queued = h.db.get_request(&offline_id).await.unwrap().unwrap();
        assert_eq!(queued.body, r#"{"subject":"Streetlight out"}"#);
        assert_eq!(queued.headers.get("content-type").map(String::as_str), Some("application/json"));

        h.network.set_online(true);
        h.network.respond(SUBMIT, HttpResponse::new(201, r#"{"id":12}"#));
        let report = h.intermediary.coordinator().replay().await.unwrap();

        assert_eq!(report.synced, vec![offline_id]);
        assert_eq!(h.db.pending_count().await.unwrap(), 0);
        let shown = h.notifier.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].kind, NotificationKind::Synced);
    }

    #[tokio::test]
    async fn test_offline_submission_store_failure_is_fatal() {
        let h = harness(&[ROOT]).await;
        h.db.execute_batch(
            "CREATE TRIGGER reject_requests BEFORE INSERT ON requests BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .await
        .unwrap();
        h.network.set_online(false);

        let submission = HttpRequest::new("POST", url(SUBMIT)).with_body(r#"{"subject":"Streetlight out"}"#);
        let result = h.intermediary.intercept(submission).await;

        assert!(matches!(result, Err(Error::PersistenceFailed(_))));
        assert_eq!(h.db.pending_count().await.unwrap(), 0);
        assert!(h.notifier.shown().is_empty());
    }

    #[tokio::test]
    async fn test_online_submission_is_forwarded() {
        let h = harness(&[ROOT]).await;
        h.network.respond(SUBMIT, HttpResponse::new(201, r#"{"id":3}"#));

        let submission = HttpRequest::new("POST", url(SUBMIT)).with_body("{\"subject\":\"x\"}");
        let response = h.intermediary.intercept(submission).await.unwrap();

        assert_eq!(response.status, 201);
        let forwarded = h.network.calls().pop().unwrap();
        assert_eq!(forwarded.body.as_deref(), Some(&b"{\"subject\":\"x\"}"[..]));
        assert_eq!(h.db.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submission_error_status_is_not_queued() {
        let h = harness(&[ROOT]).await;
        h.network.respond(SUBMIT, HttpResponse::new(422, "invalid"));

        let response = h.intermediary.intercept(HttpRequest::new("POST", url(SUBMIT)).with_body("{}")).await.unwrap();

        assert_eq!(response.status, 422);
        assert_eq!(h.db.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_binary_submission_is_rejected() {
        let h = harness(&[ROOT]).await;
        h.network.set_online(false);

        let result = h.intermediary.intercept(HttpRequest::new("POST", url(SUBMIT)).with_body(vec![0xff, 0x00])).await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(h.db.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_other_mutations_pass_through() {
        let h = harness(&[ROOT]).await;
        h.network.set_online(false);
        let comment = HttpRequest::new("POST", url("https://api.portal.test/api/complaints/3/comments")).with_body("hi");

        let result = h.intermediary.intercept(comment).await;

        assert!(matches!(result, Err(Error::NetworkUnavailable(_))));
        assert_eq!(h.db.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_root_navigation_serves_offline_page() {
        let h = harness(&[OFFLINE, SCRIPT]).await;
        h.network.set_online(false);

        let response = h.intermediary.intercept(navigate(ROOT)).await.unwrap();

        assert_eq!(response.body, "<html>offline</html>");
    }

    #[tokio::test]
    async fn test_offline_navigation_prefers_exact_copy() {
        let h = harness(&[ROOT, OFFLINE]).await;
        let page = "https://portal.test/complaints/new";
        h.network.respond(page, HttpResponse::new(200, "<html>form</html>"));

        h.intermediary.intercept(navigate(page)).await.unwrap();
        h.intermediary.settle().await;
        h.network.set_online(false);

        assert_eq!(h.intermediary.intercept(navigate(page)).await.unwrap().body, "<html>form</html>");
        let unseen = h.intermediary.intercept(navigate("https://portal.test/complaints/7")).await.unwrap();
        assert_eq!(unseen.body, "<html>offline</html>");
    }

    #[tokio::test]
    async fn test_offline_navigation_falls_back_to_root() {
        let h = harness(&[ROOT]).await;
        h.network.set_online(false);

        let response = h.intermediary.intercept(navigate("https://portal.test/complaints")).await.unwrap();
        assert_eq!(response.body, "<html>root</html>");
    }

    #[tokio::test]
    async fn test_offline_navigation_falls_back_to_visited_root() {
        let h = harness(&[SCRIPT]).await;
        h.intermediary.intercept(navigate(ROOT)).await.unwrap();
        h.intermediary.settle().await;
        h.network.set_online(false);

        let response = h.intermediary.intercept(navigate("https://portal.test/complaints")).await.unwrap();
        assert_eq!(response.body, "<html>root</html>");
    }

    #[tokio::test]
    async fn test_offline_navigation_without_fallbacks_fails() {
        let h = harness(&[SCRIPT]).await;
        h.network.set_online(false);

        let result = h.intermediary.intercept(navigate("https://portal.test/complaints")).await;
        assert!(matches!(result, Err(Error::NetworkUnavailable(_))));
    }

    #[tokio::test]
    async fn test_fallbacks_from_config() {
        let config = AppConfig { origin: "https://portal.test".into(), ..Default::default() };
        let fallbacks = NavigationFallbacks::from_config(&config).unwrap();
        assert_eq!(fallbacks.offline_page.as_str(), OFFLINE);
        assert_eq!(fallbacks.root.as_str(), ROOT);
    }
}
