//! SQLite-backed storage for response cache tiers and the offline request queue.
//!
//! This module provides a persistent store using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Named, versioned cache tiers keyed by request identity (SHA-256)
//! - A durable `requests` queue of mutations awaiting replay
//! - Automatic schema migrations
//! - WAL mode for concurrent access from the proxy and the CLI

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod queue;
pub mod tiers;

pub use crate::Error;

pub use connection::CacheDb;
pub use queue::{PendingMutation, QueuedMutation, ReplayState};
pub use tiers::{CachedResponse, TierInfo};
