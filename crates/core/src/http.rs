//! Request and response snapshots exchanged between the UI, the intermediary
//! and the network.
//!
//! Header maps are flattened to plain `name -> value` pairs with lowercase
//! names; repeated headers are joined with `", "`.

use std::collections::BTreeMap;

use bytes::Bytes;
use url::Url;

use crate::Error;

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Uppercase HTTP method.
    pub method: String,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    /// Request body. Single-read: [`HttpRequest::take_text`] consumes it.
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: &str, url: Url) -> Self {
        Self { method: method.to_ascii_uppercase(), url, headers: BTreeMap::new(), body: None }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a header, joining with any existing value of the same name.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        join_header(&mut self.headers, name, value);
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Whether this is a top-level document navigation.
    ///
    /// Browsers mark navigations with `Sec-Fetch-Mode: navigate`; older agents
    /// are recognised by an `Accept` header asking for HTML.
    pub fn is_navigation(&self) -> bool {
        if !self.is_get() {
            return false;
        }
        match self.header("sec-fetch-mode") {
            Some(mode) => mode.eq_ignore_ascii_case("navigate"),
            None => self.header("accept").is_some_and(|accept| accept.contains("text/html")),
        }
    }

    /// Consume the body and decode it as UTF-8 text.
    ///
    /// A missing body reads as the empty string. After this call the request
    /// has no body left.
    pub fn take_text(&mut self) -> Result<String, Error> {
        match self.body.take() {
            None => Ok(String::new()),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::InvalidInput(format!("request body is not UTF-8 text: {e}"))),
        }
    }
}

/// A response snapshot: status, flattened headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: BTreeMap::new(), body: body.into() }
    }

    /// A JSON response with `content-type: application/json`.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        join_header(&mut self.headers, name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn join_header(headers: &mut BTreeMap<String, String>, name: &str, value: &str) {
    headers
        .entry(name.to_ascii_lowercase())
        .and_modify(|existing| {
            existing.push_str(", ");
            existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
}
