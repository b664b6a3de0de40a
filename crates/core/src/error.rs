//! Unified error types for tether.
//!
//! Each variant carries a stable code prefix so that log lines and HTTP error
//! bodies can be matched without parsing free text.

use tokio_rusqlite::rusqlite;

/// Unified error types for the tether intermediary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input (e.g., a non-UTF-8 mutation body).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// The network exchange failed before a response arrived.
    #[error("NETWORK_UNAVAILABLE: {0}")]
    NetworkUnavailable(String),

    /// The network exchange timed out.
    #[error("NETWORK_TIMEOUT: {0}")]
    Timeout(String),

    /// Response body exceeded the configured limit.
    #[error("RESPONSE_TOO_LARGE: {0}")]
    TooLarge(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A queued mutation could not be persisted.
    #[error("PERSISTENCE_FAILED: {0}")]
    PersistenceFailed(String),

    /// Install-time pre-population failed; nothing was written.
    #[error("PREPOPULATION_FAILED: {url}: {reason}")]
    PrepopulationFailed { url: String, reason: String },

    /// Stored data could not be encoded or decoded.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// A host platform primitive (retry registration, notification display) failed.
    #[error("PLATFORM_ERROR: {0}")]
    Platform(String),
}

impl Error {
    /// Whether the failure happened at the network layer, before any response.
    ///
    /// Only these failures are absorbed by cache fallbacks and the offline queue.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_) | Error::Timeout(_))
    }

    /// Stable code prefix of the error, without the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::NetworkUnavailable(_) => "NETWORK_UNAVAILABLE",
            Error::Timeout(_) => "NETWORK_TIMEOUT",
            Error::TooLarge(_) => "RESPONSE_TOO_LARGE",
            Error::Database(_) | Error::MigrationFailed(_) => "CACHE_ERROR",
            Error::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            Error::PrepopulationFailed { .. } => "PREPOPULATION_FAILED",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Platform(_) => "PLATFORM_ERROR",
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NetworkUnavailable("GET https://example.com/".to_string());
        assert!(err.to_string().starts_with("NETWORK_UNAVAILABLE: "));
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn test_prepopulation_display() {
        let err = Error::PrepopulationFailed { url: "https://example.com/app.js".into(), reason: "status 404".into() };
        assert_eq!(err.to_string(), "PREPOPULATION_FAILED: https://example.com/app.js: status 404");
    }

    #[test]
    fn test_is_network() {
        assert!(Error::NetworkUnavailable("connection refused".into()).is_network());
        assert!(Error::Timeout("20000ms".into()).is_network());
        assert!(!Error::TooLarge("6MB".into()).is_network());
        assert!(!Error::PersistenceFailed("disk full".into()).is_network());
    }

    #[test]
    fn test_code_matches_display_prefix() {
        let errors = [
            Error::InvalidInput("x".into()),
            Error::NetworkUnavailable("x".into()),
            Error::Timeout("x".into()),
            Error::PersistenceFailed("x".into()),
            Error::Platform("x".into()),
        ];
        for err in errors {
            assert!(err.to_string().starts_with(err.code()));
        }
    }
}
