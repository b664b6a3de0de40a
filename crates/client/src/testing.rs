//! Scripted collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tether_core::{Error, HttpRequest, HttpResponse};

use crate::fetch::Network;
use crate::notify::{Notification, Notifier};
use crate::sync::SyncRegistrar;

/// Network with per-URL scripted responses and an offline switch.
///
/// Unscripted URLs answer 404. While offline every exchange fails with
/// [`Error::NetworkUnavailable`]; calls are logged either way.
pub struct FakeNetwork {
    responses: Mutex<HashMap<String, HttpResponse>>,
    calls: Mutex<Vec<HttpRequest>>,
    online: AtomicBool,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self { responses: Mutex::new(HashMap::new()), calls: Mutex::new(Vec::new()), online: AtomicBool::new(true) }
    }

    pub fn respond(&self, url: &str, response: HttpResponse) {
        let url = url::Url::parse(url).map(String::from).unwrap_or_else(|_| url.to_string());
        self.responses.lock().unwrap().insert(url, response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of exchanges attempted for `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        let url = url::Url::parse(url).map(String::from).unwrap_or_else(|_| url.to_string());
        self.calls.lock().unwrap().iter().filter(|call| call.url.as_str() == url).count()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        self.calls.lock().unwrap().push(request.clone());
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::NetworkUnavailable(format!("offline: {}", request.url)));
        }
        let scripted = self.responses.lock().unwrap().get(request.url.as_str()).cloned();
        Ok(scripted.unwrap_or_else(|| HttpResponse::new(404, "not found")))
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Notifier that records what it was asked to show.
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self { shown: Mutex::new(Vec::new()), attempts: AtomicUsize::new(0), fail: false }
    }

    /// A notifier whose every delivery fails.
    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn show(&self, notification: &Notification) -> Result<(), Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Platform("notifications denied".into()));
        }
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Registrar that records the tags it was asked to register.
pub struct RecordingRegistrar {
    tags: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingRegistrar {
    pub fn new() -> Self {
        Self { tags: Mutex::new(Vec::new()), fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncRegistrar for RecordingRegistrar {
    async fn register(&self, tag: &str) -> Result<(), Error> {
        self.tags.lock().unwrap().push(tag.to_string());
        if self.fail {
            return Err(Error::Platform("background sync unsupported".into()));
        }
        Ok(())
    }
}
