//! Notification dispatch.
//!
//! Push payloads arrive outside any request and may be absent or malformed;
//! they are parsed field by field and anything unusable falls back to the
//! defaults. Delivery failures are logged and never propagate to the caller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_core::{Error, QueuedMutation};

const DEFAULT_TITLE: &str = "New update";
const DEFAULT_BODY: &str = "You have a new notification.";
const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";
const DEFAULT_URL: &str = "/";

/// Action that dismisses a notification without navigating.
pub const CLOSE_ACTION: &str = "close";

/// Why a notification was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Push,
    Synced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A rendered, user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Destination opened when the notification is clicked.
    pub url: String,
    pub tag: Option<String>,
    pub actions: Vec<NotificationAction>,
}

/// Fields of an out-of-band push payload. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub url: Option<String>,
    pub tag: Option<String>,
}

impl PushPayload {
    /// Parse a push payload without failing.
    ///
    /// Absent data, invalid JSON, or a non-object yield the empty payload;
    /// fields that are not non-empty strings are ignored individually.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return Self::default();
        };
        let value: serde_json::Value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("malformed push payload, using defaults: {e}");
                return Self::default();
            }
        };
        let Some(object) = value.as_object() else {
            tracing::warn!("push payload is not a JSON object, using defaults");
            return Self::default();
        };
        let field = |name: &str| {
            object
                .get(name)
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        Self {
            title: field("title"),
            body: field("body"),
            icon: field("icon"),
            badge: field("badge"),
            url: field("url"),
            tag: field("tag"),
        }
    }
}

impl Notification {
    pub fn from_push(payload: PushPayload) -> Self {
        Self {
            kind: NotificationKind::Push,
            title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.into()),
            body: payload.body.unwrap_or_else(|| DEFAULT_BODY.into()),
            icon: payload.icon.unwrap_or_else(|| DEFAULT_ICON.into()),
            badge: payload.badge.unwrap_or_else(|| DEFAULT_BADGE.into()),
            url: payload.url.unwrap_or_else(|| DEFAULT_URL.into()),
            tag: payload.tag,
            actions: default_actions(),
        }
    }

    /// Completion alert for a mutation confirmed by replay.
    pub fn synced(mutation: &QueuedMutation) -> Self {
        Self {
            kind: NotificationKind::Synced,
            title: "Complaint synced".into(),
            body: "Your complaint submitted while offline has been delivered.".into(),
            icon: DEFAULT_ICON.into(),
            badge: DEFAULT_BADGE.into(),
            url: DEFAULT_URL.into(),
            tag: Some(format!("synced-{}", mutation.id)),
            actions: default_actions(),
        }
    }

    /// Destination for a click on this notification.
    ///
    /// A click on the body (`None`) or on any action other than
    /// [`CLOSE_ACTION`] routes to the notification's URL.
    pub fn click_destination(&self, action: Option<&str>) -> Option<&str> {
        click_destination(&self.url, action)
    }
}

/// Destination for a click on a notification pointing at `url`.
pub fn click_destination<'a>(url: &'a str, action: Option<&str>) -> Option<&'a str> {
    match action {
        Some(CLOSE_ACTION) => None,
        _ => Some(url),
    }
}

fn default_actions() -> Vec<NotificationAction> {
    vec![
        NotificationAction { action: "open".into(), title: "View".into() },
        NotificationAction { action: CLOSE_ACTION.into(), title: "Dismiss".into() },
    ]
}

/// Host platform primitive that displays notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<(), Error>;
}

/// Notifier that logs each notification and keeps the most recent ones.
#[derive(Clone)]
pub struct LogNotifier {
    recent: Arc<Mutex<VecDeque<Notification>>>,
    capacity: usize,
}

impl LogNotifier {
    pub fn new(capacity: usize) -> Self {
        Self { recent: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))), capacity }
    }

    /// Most recent notifications, oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn show(&self, notification: &Notification) -> Result<(), Error> {
        tracing::info!(
            kind = ?notification.kind,
            title = %notification.title,
            tag = notification.tag.as_deref().unwrap_or(""),
            url = %notification.url,
            "notification"
        );
        if self.capacity == 0 {
            return Ok(());
        }
        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(notification.clone());
        Ok(())
    }
}

/// Renders notifications and hands them to the host [`Notifier`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Handle an out-of-band push delivery.
    ///
    /// Always renders a notification, using defaults for anything missing.
    pub async fn push(&self, data: Option<&[u8]>) -> Notification {
        let notification = Notification::from_push(PushPayload::parse(data));
        self.deliver(&notification).await;
        notification
    }

    /// Report a mutation confirmed by replay.
    pub async fn synced(&self, mutation: &QueuedMutation) -> Notification {
        let notification = Notification::synced(mutation);
        self.deliver(&notification).await;
        notification
    }

    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.notifier.show(notification).await {
            tracing::warn!(title = %notification.title, "notification delivery failed: {e}");
        }
    }
}
