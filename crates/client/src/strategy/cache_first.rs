use tether_core::{Error, HttpRequest, HttpResponse};

use super::Intermediary;
use crate::router::Tier;

impl Intermediary {
    /// Cache first with stale-while-revalidate.
    ///
    /// A hit is returned immediately and refreshed in the background unless
    /// the network is known to be down. A miss is fetched synchronously.
    pub(super) async fn cache_first(&self, request: HttpRequest, tier: Tier) -> Result<HttpResponse, Error> {
        if let Some(hit) = self.cached(tier, &request).await {
            if self.network.is_online() {
                self.revalidate(tier, request);
            } else {
                tracing::debug!(url = %request.url, "offline, skipping revalidation");
            }
            return Ok(hit);
        }

        let response = self.network.send(&request).await?;
        self.write_behind(tier, request, response.clone());
        Ok(response)
    }

    fn revalidate(&self, tier: Tier, request: HttpRequest) {
        let network = self.network.clone();
        let tiers = self.tiers.clone();
        self.lifetime.extend(async move {
            match network.send(&request).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = tiers.store(tier, &request, &response).await {
                        tracing::warn!(url = %request.url, ?tier, "revalidated copy not stored: {e}");
                    }
                }
                Ok(response) => {
                    tracing::debug!(url = %request.url, status = response.status, "revalidation kept cached copy");
                }
                Err(e) => tracing::warn!(url = %request.url, "revalidation failed: {e}"),
            }
        });
    }
}
