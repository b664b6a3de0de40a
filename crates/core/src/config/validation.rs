//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for out-of-range limits, unparsable
    /// URLs, tier naming that would break version cleanup, or an inverted
    /// retry window. Returns `ConfigError::Missing` when there is nothing to
    /// pre-populate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.app_name.is_empty() || self.app_name.chars().any(char::is_whitespace) {
            return Err(invalid("app_name", "must be non-empty and contain no whitespace"));
        }
        if self.app_name.contains("-static-") || self.app_name.contains("-dynamic-") {
            return Err(invalid("app_name", "must not contain a tier marker (-static- or -dynamic-)"));
        }
        if self.cache_version.is_empty() || self.cache_version.chars().any(char::is_whitespace) {
            return Err(invalid("cache_version", "must be non-empty and contain no whitespace"));
        }

        self.origin_url()?;
        self.api_base_url()?;

        if !self.submission_path.starts_with('/') {
            return Err(invalid("submission_path", "must start with '/'"));
        }
        if !self.offline_page.starts_with('/') {
            return Err(invalid("offline_page", "must start with '/'"));
        }

        if self.precache_urls.is_empty() {
            return Err(ConfigError::Missing {
                field: "precache_urls".into(),
                hint: "list at least the root document, e.g. [\"/\"]".into(),
            });
        }
        self.precache_targets()?;
        if !self.precache_urls.contains(&self.offline_page) {
            tracing::warn!(
                offline_page = %self.offline_page,
                "offline_page is not pre-populated; failed navigations fall back to the root document"
            );
        }

        if self.retry_max_attempts == 0 {
            return Err(invalid("retry_max_attempts", "must be at least 1"));
        }
        if self.retry_base_ms > self.retry_max_ms {
            return Err(invalid("retry_base_ms", "must not exceed retry_max_ms"));
        }

        if self.sync_interval_ms == 0 {
            return Err(invalid("sync_interval_ms", "must be greater than 0"));
        }

        if self.dynamic_max_entries == Some(0) {
            return Err(invalid("dynamic_max_entries", "must be greater than 0 when set"));
        }

        Ok(())
    }
}
