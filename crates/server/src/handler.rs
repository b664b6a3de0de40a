//! HTTP surface: the reverse proxy and the route table.
//!
//! Every request outside `/__tether/` is mapped onto its upstream and handed
//! to the intermediary, which decides between network, cache and queue.

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{any, get, post};
use tether_core::{HttpRequest, HttpResponse};

use crate::control;
use crate::error::ApiError;
use crate::state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/__tether/sync", post(control::sync))
        .route("/__tether/push", post(control::push))
        .route("/__tether/notifications", get(control::notifications))
        .route("/__tether/notifications/click", post(control::click))
        .route("/__tether/queue", get(control::queue))
        .route("/__tether/*rest", any(control::not_found))
        .fallback(proxy)
        .with_state(state)
}

/// Forward a client request through the intermediary.
pub async fn proxy(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let url = state.upstream.map(parts.uri.path(), parts.uri.query());

    let mut intercepted = HttpRequest::new(parts.method.as_str(), url);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            intercepted.insert_header(name.as_str(), value);
        }
    }
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| ApiError::PayloadTooLarge(format!("request body rejected: {e}")))?;
    if !body.is_empty() {
        intercepted.body = Some(body);
    }

    let response = state.intermediary.intercept(intercepted).await?;
    Ok(into_response(response))
}

fn into_response(upstream: HttpResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = response.headers_mut();
    for (name, value) in &upstream.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.append(name, value);
        }
    }
    response
}
