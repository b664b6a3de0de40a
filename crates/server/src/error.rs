//! HTTP mapping of tether errors.
//!
//! Only failures that exhausted every fallback reach this point. Bodies are
//! JSON `{error, code}` where `code` is the stable error code prefix.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tether_core::Error;

/// Errors returned by the proxy and control handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Tether(#[from] Error),

    /// Unknown control endpoint.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Client request body over the limit or unreadable.
    #[error("PAYLOAD_TOO_LARGE: {0}")]
    PayloadTooLarge(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Tether(err) => match err {
                Error::NetworkUnavailable(_) | Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                Error::InvalidInput(_) | Error::InvalidUrl(_) => StatusCode::BAD_REQUEST,
                Error::TooLarge(_) => StatusCode::BAD_GATEWAY,
                Error::PrepopulationFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
                Error::Database(_)
                | Error::MigrationFailed(_)
                | Error::PersistenceFailed(_)
                | Error::Serialization(_)
                | Error::Platform(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Tether(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "request failed: {self}");
        }
        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, Json(body)).into_response()
    }
}
