//! Request identity keys for cache entries.

use sha2::{Digest, Sha256};
use url::Url;

/// Compute the cache key for a request identity.
///
/// The identity is the uppercase method plus the canonical URL: host already
/// lowercased by the URL parser, fragment removed, query kept verbatim.
pub fn compute_cache_key(method: &str, url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
