//! Control endpoints under `/__tether/`.
//!
//! - `POST /__tether/sync`: run a replay pass now and return its report
//! - `POST /__tether/push`: deliver an out-of-band push payload
//! - `GET /__tether/notifications`: recently shown notifications
//! - `POST /__tether/notifications/click`: resolve a click to a destination
//! - `GET /__tether/queue`: queued mutations with their replay state

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::Uri;
use serde::{Deserialize, Serialize};
use tether_client::{Notification, QueueEntry, ReplayReport, click_destination};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn sync(State(state): State<AppState>) -> Result<Json<ReplayReport>, ApiError> {
    let report = state.coordinator().replay().await?;
    if report.has_pending() {
        state.coordinator().request_sync().await;
    }
    Ok(Json(report))
}

pub async fn push(State(state): State<AppState>, body: Bytes) -> Json<Notification> {
    let data = (!body.is_empty()).then_some(&body[..]);
    Json(state.dispatcher().push(data).await)
}

pub async fn notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.notifications.recent())
}

#[derive(Debug, Deserialize)]
pub struct ClickRequest {
    pub url: String,
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClickResponse {
    /// Where the UI should navigate, or null when the click dismissed the alert.
    pub navigate: Option<String>,
}

pub async fn click(Json(click): Json<ClickRequest>) -> Json<ClickResponse> {
    let navigate = click_destination(&click.url, click.action.as_deref()).map(str::to_string);
    Json(ClickResponse { navigate })
}

pub async fn queue(State(state): State<AppState>) -> Result<Json<Vec<QueueEntry>>, ApiError> {
    Ok(Json(state.coordinator().queue().await?))
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

#[cfg(test)]
mod tests {
    use crate::handler::router;
    use crate::testing::{StubNetwork, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn call(app: axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post(uri: &str, body: &'static str) -> Request<Body> {
        Request::post(uri).header("content-type", "application/json").body(Body::from(body)).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_push_with_garbage_renders_default() {
        let (state, _triggers) = state(Arc::new(StubNetwork::online())).await;

        let (status, body) = call(router(state.clone()), post("/__tether/push", "{{not json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "New update");
        assert_eq!(body["url"], "/");

        let (_, recent) = call(router(state), get("/__tether/notifications")).await;
        assert_eq!(recent.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_without_body() {
        let (state, _triggers) = state(Arc::new(StubNetwork::online())).await;
        let (status, body) = call(router(state), Request::post("/__tether/push").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "push");
    }

    #[tokio::test]
    async fn test_click_routing() {
        let (state, _triggers) = state(Arc::new(StubNetwork::online())).await;

        let (_, open) =
            call(router(state.clone()), post("/__tether/notifications/click", r#"{"url":"/complaints/4","action":"open"}"#))
                .await;
        assert_eq!(open["navigate"], "/complaints/4");

        let (_, body_click) = call(router(state.clone()), post("/__tether/notifications/click", r#"{"url":"/c"}"#)).await;
        assert_eq!(body_click["navigate"], "/c");

        let (_, dismissed) =
            call(router(state), post("/__tether/notifications/click", r#"{"url":"/c","action":"close"}"#)).await;
        assert!(dismissed["navigate"].is_null());
    }

    #[tokio::test]
    async fn test_queue_and_sync() {
        let network = Arc::new(StubNetwork::offline());
        let (state, _triggers) = state(network.clone()).await;
        call(router(state.clone()), post("/api/complaints", r#"{"subject":"Noise"}"#)).await;

        let (_, queue) = call(router(state.clone()), get("/__tether/queue")).await;
        let entries = queue.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["body"], r#"{"subject":"Noise"}"#);
        assert!(entries[0]["replay"].is_null());

        network.set_online(true);
        let (status, report) = call(router(state.clone()), post("/__tether/sync", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["synced"].as_array().unwrap().len(), 1);

        let (_, recent) = call(router(state), get("/__tether/notifications")).await;
        assert_eq!(recent[0]["kind"], "synced");
    }
}
