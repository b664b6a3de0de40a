use serde_json::json;
use tether_core::{Error, HttpRequest, HttpResponse, PendingMutation, QueuedMutation};

use super::Intermediary;

impl Intermediary {
    /// Forward a submission; if it fails at the network layer, queue it and
    /// answer 202 in the same turn.
    ///
    /// The body is read once, up front, and the same text is both forwarded
    /// and captured.
    pub(super) async fn offline_mutation(&self, mut request: HttpRequest) -> Result<HttpResponse, Error> {
        let body = request.take_text()?;
        request.body = Some(body.clone().into());

        let err = match self.network.send(&request).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_network() => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(url = %request.url, "submission failed at the network layer, queueing: {err}");
        let queued = self
            .coordinator
            .enqueue(PendingMutation { url: request.url.to_string(), method: request.method, headers: request.headers, body })
            .await?;
        Ok(accepted(&queued))
    }
}

fn accepted(queued: &QueuedMutation) -> HttpResponse {
    HttpResponse::json(
        202,
        &json!({
            "success": true,
            "offline": true,
            "offlineId": queued.id,
            "message": "Complaint saved offline and will be submitted when the connection returns.",
        }),
    )
}
