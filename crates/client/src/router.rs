//! Request classification.
//!
//! The router is an ordered table of `(predicate, strategy)` pairs; the first
//! predicate that matches selects the strategy. The standard table is:
//!
//! 1. non-GET to the submission path → offline-aware mutation handler
//! 2. any other non-GET → passthrough
//! 3. GET under the API base → network-first, dynamic tier
//! 4. GET of a static asset extension → cache-first, static tier
//! 5. top-level navigation → navigation fallback
//! 6. anything else → network-first, dynamic tier

use std::collections::BTreeSet;

use tether_core::{AppConfig, Error, HttpRequest};
use url::Url;

/// Cache tier selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Static,
    Dynamic,
}

/// Strategy executed for a classified request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    OfflineMutation,
    Passthrough,
    NetworkFirst(Tier),
    CacheFirst(Tier),
    NavigationFallback,
}

/// Request predicate of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Non-GET request whose path is the submission path.
    Submission { path: String },
    NonGet,
    /// GET on the API origin under the API base path.
    ApiGet { base: Url },
    /// GET whose last path segment has one of these extensions (lowercase).
    StaticAsset { extensions: BTreeSet<String> },
    Navigation,
    Any,
}

impl Predicate {
    pub fn matches(&self, request: &HttpRequest) -> bool {
        match self {
            Predicate::Submission { path } => !request.is_get() && trim_slash(request.url.path()) == trim_slash(path),
            Predicate::NonGet => !request.is_get(),
            Predicate::ApiGet { base } => request.is_get() && under_base(&request.url, base),
            Predicate::StaticAsset { extensions } => {
                request.is_get() && extension(&request.url).is_some_and(|ext| extensions.contains(&ext))
            }
            Predicate::Navigation => request.is_navigation(),
            Predicate::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub predicate: Predicate,
    pub strategy: Strategy,
}

impl Route {
    pub fn new(predicate: Predicate, strategy: Strategy) -> Self {
        Self { predicate, strategy }
    }
}

/// Ordered, first-match-wins route table.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// The standard route table.
    pub fn standard(submission_path: &str, api_base: Url, static_extensions: &[String]) -> Self {
        let extensions = static_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self::new(vec![
            Route::new(Predicate::Submission { path: submission_path.to_string() }, Strategy::OfflineMutation),
            Route::new(Predicate::NonGet, Strategy::Passthrough),
            Route::new(Predicate::ApiGet { base: api_base }, Strategy::NetworkFirst(Tier::Dynamic)),
            Route::new(Predicate::StaticAsset { extensions }, Strategy::CacheFirst(Tier::Static)),
            Route::new(Predicate::Navigation, Strategy::NavigationFallback),
            Route::new(Predicate::Any, Strategy::NetworkFirst(Tier::Dynamic)),
        ])
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let api_base = config.api_base_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self::standard(&config.submission_path, api_base, &config.static_extensions))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Select the strategy for a request. Unmatched requests pass through.
    pub fn classify(&self, request: &HttpRequest) -> Strategy {
        self.routes
            .iter()
            .find(|route| route.predicate.matches(request))
            .map_or(Strategy::Passthrough, |route| route.strategy)
    }
}

fn trim_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

fn under_base(url: &Url, base: &Url) -> bool {
    if url.scheme() != base.scheme() || url.host_str() != base.host_str() || url.port_or_known_default() != base.port_or_known_default()
    {
        return false;
    }
    let prefix = trim_slash(base.path());
    let path = url.path();
    prefix == "/" || path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
