use tether_core::{Error, HttpRequest, HttpResponse};

use super::Intermediary;
use crate::router::Tier;

impl Intermediary {
    /// Network first; a network-layer failure is answered from `tier` if it
    /// holds a copy of the same identity.
    pub(super) async fn network_first(&self, request: HttpRequest, tier: Tier) -> Result<HttpResponse, Error> {
        match self.network.send(&request).await {
            Ok(response) => {
                self.write_behind(tier, request, response.clone());
                Ok(response)
            }
            Err(e) if e.is_network() => match self.cached(tier, &request).await {
                Some(hit) => {
                    tracing::debug!(url = %request.url, ?tier, "network failed, serving cached copy");
                    Ok(hit)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}
