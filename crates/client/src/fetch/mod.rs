//! Network access for the intermediary.
//!
//! ### Network seam
//! Strategy executors never talk to reqwest directly; they go through the
//! [`Network`] trait so tests can script connectivity.
//!
//! ### Upstream exchange
//! - Hop-by-hop headers are not forwarded in either direction.
//! - The client's `accept-encoding` is dropped; reqwest offers only the
//!   codecs it can decode.
//! - Redirects are returned to the caller untouched.
//! - Bodies are decompressed; `content-encoding`/`content-length` are dropped.
//! - Max body bytes: 5MB (configurable)
//!
//! ### Error classification
//! - Connect/transport failures → `NetworkUnavailable`
//! - Timeouts → `Timeout`
//! - Any HTTP status, including 5xx, is a response, not an error.
//!
//! ### Connectivity hint
//! A failed exchange marks the client offline for `offline_hint_ttl`; after
//! that the hint reads online again until the next failure.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, header};
use tether_core::{AppConfig, Error, HttpRequest, HttpResponse};

/// Headers that describe a single connection and never cross the intermediary.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Request headers the client negotiates itself.
const CLIENT_NEGOTIATED: &[&str] = &["accept-encoding"];

/// Access to the network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform one exchange.
    ///
    /// Returns an error only when no response was received.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, Error>;

    /// Best-effort connectivity hint.
    fn is_online(&self) -> bool {
        true
    }
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "tether/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// How long a failed exchange keeps the client reporting offline (default: 30s)
    pub offline_hint_ttl: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "tether/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            offline_hint_ttl: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// reqwest-backed [`Network`].
///
/// Remembers when the last exchange failed to answer [`Network::is_online`].
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
    offline_since: Mutex<Option<Instant>>,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Platform(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config, offline_since: Mutex::new(None) })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn mark(&self, failed_at: Option<Instant>) {
        if let Ok(mut offline_since) = self.offline_since.lock() {
            *offline_since = failed_at;
        }
    }

    fn classify(&self, err: reqwest::Error) -> Error {
        self.mark(Some(Instant::now()));
        if err.is_timeout() {
            Error::Timeout(format!("{}ms", self.config.timeout.as_millis()))
        } else {
            Error::NetworkUnavailable(err.to_string())
        }
    }
}

#[async_trait]
impl Network for FetchClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.http.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) && !CLIENT_NEGOTIATED.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        self.mark(None);

        let status = response.status().as_u16();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::TooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let mut headers = std::collections::BTreeMap::new();
        for (name, value) in response.headers() {
            if is_hop_by_hop(name.as_str()) || *name == header::CONTENT_ENCODING {
                continue;
            }
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
        }

        let bytes: Bytes = response.bytes().await.map_err(|e| self.classify(e))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::TooLarge(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status,
            bytes = bytes.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "upstream exchange"
        );

        Ok(HttpResponse { status, headers, body: bytes })
    }

    fn is_online(&self) -> bool {
        match self.offline_since.lock() {
            Ok(offline_since) => offline_since.is_none_or(|at| at.elapsed() >= self.config.offline_hint_ttl),
            Err(_) => true,
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) || name.to_ascii_lowercase().starts_with("proxy-")
}
