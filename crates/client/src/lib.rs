//! Client side of tether.
//!
//! This crate provides the intermediary that sits between the UI and the
//! network: request routing, caching strategies, the offline mutation queue,
//! replay coordination and notification dispatch. The server and CLI share it.

pub mod fetch;
pub mod lifetime;
pub mod notify;
pub mod router;
pub mod strategy;
pub mod sync;
pub mod tiers;

#[cfg(test)]
pub(crate) mod testing;

pub use fetch::{FetchClient, FetchConfig, Network};
pub use lifetime::Lifetime;
pub use notify::{LogNotifier, Notification, NotificationDispatcher, Notifier, PushPayload, click_destination};
pub use router::{Predicate, Route, Router, Strategy, Tier};
pub use strategy::{Intermediary, NavigationFallbacks};
pub use sync::{QueueEntry, ReplayReport, RetryPolicy, SYNC_TAG, SyncCoordinator, SyncRegistrar, TimerRegistrar};
pub use tiers::{CacheTierManager, TierNames};
