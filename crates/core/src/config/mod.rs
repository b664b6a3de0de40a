//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TETHER_*)
//! 2. TOML config file (if TETHER_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (TETHER_*)
/// 2. TOML config file (if TETHER_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite store holding cache tiers and the request queue.
    ///
    /// Set via TETHER_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Listen address of the intermediary.
    ///
    /// Set via TETHER_BIND_ADDR environment variable.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Origin serving the application shell and static assets.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Base URL of the remote JSON API. GETs under it are served network-first.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Path of the complaint submission endpoint whose mutations are queued
    /// when the network is unavailable.
    #[serde(default = "default_submission_path")]
    pub submission_path: String,

    /// Application name, used as the cache tier name prefix.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Deployment version tag. Changing it retires the previous tiers on activation.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Critical assets pre-populated into the static tier on install,
    /// as paths relative to `origin` or absolute URLs.
    #[serde(default = "default_precache_urls")]
    pub precache_urls: Vec<String>,

    /// Page served to navigations that fail with no cached copy.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,

    /// Path extensions served cache-first from the static tier.
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,

    /// User-Agent string for upstream requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum upstream response size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Delay between a deferred-retry registration and the replay it triggers.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// First backoff delay after a failed replay. Zero disables backoff.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Upper bound of the replay backoff delay.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Failed replays after which a mutation is parked.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Optional cap on the number of entries in the dynamic tier.
    #[serde(default)]
    pub dynamic_max_entries: Option<usize>,

    /// Number of recent notifications kept for inspection.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tether.sqlite")
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".into()
}

fn default_origin() -> String {
    "http://localhost:3000".into()
}

fn default_api_base() -> String {
    "http://localhost:3001/api".into()
}

fn default_submission_path() -> String {
    "/api/complaints".into()
}

fn default_app_name() -> String {
    "complaints".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_precache_urls() -> Vec<String> {
    ["/", "/index.html", "/offline.html", "/manifest.json"].map(String::from).to_vec()
}

fn default_offline_page() -> String {
    "/offline.html".into()
}

fn default_static_extensions() -> Vec<String> {
    ["js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf"]
        .map(String::from)
        .to_vec()
}

fn default_user_agent() -> String {
    "tether/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_sync_interval_ms() -> u64 {
    30_000
}

fn default_retry_base_ms() -> u64 {
    30_000
}

fn default_retry_max_ms() -> u64 {
    3_600_000
}

fn default_retry_max_attempts() -> u32 {
    8
}

fn default_notification_buffer() -> usize {
    50
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            origin: default_origin(),
            api_base: default_api_base(),
            submission_path: default_submission_path(),
            app_name: default_app_name(),
            cache_version: default_cache_version(),
            precache_urls: default_precache_urls(),
            offline_page: default_offline_page(),
            static_extensions: default_static_extensions(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            sync_interval_ms: default_sync_interval_ms(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            dynamic_max_entries: None,
            notification_buffer: default_notification_buffer(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("origin", &self.origin)
    }

    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("api_base", &self.api_base)
    }

    /// Resolve a path or absolute URL against `origin`.
    pub fn resolve(&self, target: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(target)
            .map_err(|e| ConfigError::Invalid { field: target.to_string(), reason: e.to_string() })
    }

    /// Resolved pre-population targets.
    pub fn precache_targets(&self) -> Result<Vec<Url>, ConfigError> {
        self.precache_urls.iter().map(|target| self.resolve(target)).collect()
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `TETHER_`
    /// 2. TOML file from `TETHER_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TETHER_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TETHER_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

fn parse_http_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid { field: field.into(), reason: e.to_string() })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::Invalid { field: field.into(), reason: format!("unsupported scheme: {scheme}") }),
    }
}
