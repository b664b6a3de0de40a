//! Core types and shared functionality for tether.
//!
//! This crate provides:
//! - SQLite-backed store for cache tiers and the offline request queue
//! - Request/response snapshots exchanged with the network
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod http;

pub use cache::{CacheDb, CachedResponse, PendingMutation, QueuedMutation, ReplayState, TierInfo};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use http::{HttpRequest, HttpResponse};
