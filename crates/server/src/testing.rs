//! Fixtures for handler tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tether_client::{
    CacheTierManager, Intermediary, LogNotifier, Network, NotificationDispatcher, SyncCoordinator, TierNames,
    TimerRegistrar,
};
use tether_core::{AppConfig, CacheDb, Error, HttpRequest, HttpResponse};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::state::{AppState, Upstream};

/// Upstream that answers every request with `201 {"ok":true}` while online.
pub struct StubNetwork {
    online: AtomicBool,
    last: Mutex<Option<HttpRequest>>,
}

impl StubNetwork {
    pub fn online() -> Self {
        Self { online: AtomicBool::new(true), last: Mutex::new(None) }
    }

    pub fn offline() -> Self {
        Self { online: AtomicBool::new(false), last: Mutex::new(None) }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn last(&self) -> Option<HttpRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for StubNetwork {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        *self.last.lock().unwrap() = Some(request.clone());
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::NetworkUnavailable("connection refused".into()));
        }
        Ok(HttpResponse::json(201, &serde_json::json!({ "ok": true })))
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// State over an in-memory store with the default configuration.
pub async fn state(network: Arc<dyn Network>) -> (AppState, UnboundedReceiver<String>) {
    let config = AppConfig::default();
    let db = CacheDb::open_in_memory().await.unwrap();

    let notifications = LogNotifier::new(10);
    let dispatcher = NotificationDispatcher::new(Arc::new(notifications.clone()));
    let (registrar, triggers) = TimerRegistrar::new(Duration::from_secs(60));
    let coordinator =
        SyncCoordinator::new(db.clone(), network.clone(), dispatcher).with_registrar(Arc::new(registrar));
    let tiers = CacheTierManager::new(db, network.clone(), TierNames::new("complaints", "v1"), Vec::new());
    let intermediary = Intermediary::from_config(&config, tiers, coordinator, network).unwrap();

    let state = AppState {
        intermediary,
        notifications,
        upstream: Upstream::from_config(&config).unwrap(),
        max_body_bytes: config.max_bytes,
    };
    (state, triggers)
}
