use tether_core::{Error, HttpRequest, HttpResponse};

use super::Intermediary;
use crate::router::Tier;

impl Intermediary {
    /// Network first for documents. On a network-layer failure the response
    /// is, in order: a cached copy of this navigation, the precached offline
    /// page, the root document from either tier.
    pub(super) async fn navigation(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let err = match self.network.send(&request).await {
            Ok(response) => {
                self.write_behind(Tier::Dynamic, request, response.clone());
                return Ok(response);
            }
            Err(e) if e.is_network() => e,
            Err(e) => return Err(e),
        };

        match self.tiers.lookup_any(&request).await {
            Ok(Some(hit)) => {
                tracing::debug!(url = %request.url, "offline navigation served from cache");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(url = %request.url, "cache lookup failed: {e}"),
        }

        let offline_page = HttpRequest::get(self.fallbacks.offline_page.clone());
        if let Some(page) = self.fallback(&[Tier::Static], &offline_page).await {
            return Ok(page);
        }
        let root = HttpRequest::get(self.fallbacks.root.clone());
        if let Some(page) = self.fallback(&[Tier::Dynamic, Tier::Static], &root).await {
            return Ok(page);
        }

        Err(err)
    }

    async fn fallback(&self, tiers: &[Tier], page: &HttpRequest) -> Option<HttpResponse> {
        for &tier in tiers {
            match self.tiers.lookup(tier, page).await {
                Ok(Some(hit)) => {
                    tracing::debug!(fallback = %page.url, ?tier, "offline navigation fallback");
                    return Some(hit);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(fallback = %page.url, ?tier, "cache lookup failed: {e}"),
            }
        }
        None
    }
}
