pub mod client;

pub use client::{FetcherConfig, RateLimitedFetcher};

use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "webscanner/1.0";

/// Represents the type of body content in an HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyType {
    Json,
    FormUrlEncoded,
    Raw,
    None,
}

impl BodyType {
    /// Detects the body type from the Content-Type header.
    pub fn detect_body_type(headers: &HeaderMap) -> BodyType {
        if let Some(content_type) = headers.get(CONTENT_TYPE) {
            if let Ok(value) = content_type.to_str() {
                let value_lower = value.to_lowercase();
                if value_lower.contains("application/json") {
                    return BodyType::Json;
                } else if value_lower.contains("application/x-www-form-urlencoded") {
                    return BodyType::FormUrlEncoded;
                } else {
                    return BodyType::Raw;
                }
            }
        }
        BodyType::None
    }

    /// Body encoding for a form submission given its `enctype`.
    pub fn from_enctype(enctype: &str) -> BodyType {
        if enctype.to_lowercase().contains("json") {
            BodyType::Json
        } else {
            BodyType::FormUrlEncoded
        }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            BodyType::Json => Some("application/json"),
            BodyType::FormUrlEncoded => Some("application/x-www-form-urlencoded"),
            BodyType::Raw => Some("text/plain"),
            BodyType::None => None,
        }
    }
}

/// A single outbound request. Built once and never mutated after it is handed
/// to the fetcher.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
    pub body_type: BodyType,
    /// Caller cookies; merged over the fetcher's defaults, caller wins.
    pub cookies: Vec<(String, String)>,
}

impl FetchRequest {
    /// Creates a new `FetchRequest`, auto-detecting the body type from headers.
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: String) -> Self {
        let body_type = BodyType::detect_body_type(&headers);
        Self {
            method,
            url,
            headers,
            body,
            body_type,
            cookies: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, HeaderMap::new(), String::new())
    }

    pub fn post(url: Url, body: String, body_type: BodyType) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body,
            body_type,
            cookies: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = reqwest::header::HeaderValue::from_str(value) {
            self.headers.insert(name, v);
        }
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    /// Network location (`host[:port]`) used to key per-host throttling.
    pub fn host_key(&self) -> String {
        host_key(&self.url)
    }
}

pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or("").to_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

/// Why a fetch produced no usable HTTP response.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid request: {0}")]
    InvalidUrl(String),
}

impl FetchFailure {
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchFailure::Timeout
        } else if err.is_connect() {
            FetchFailure::Connect(err.to_string())
        } else if err.is_builder() {
            FetchFailure::InvalidUrl(err.to_string())
        } else {
            FetchFailure::Protocol(err.to_string())
        }
    }

    /// Timeouts and connection failures; protocol errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchFailure::Timeout | FetchFailure::Connect(_))
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of one `fetch` call, retries included.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub outcome: Result<FetchResponse, FetchFailure>,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn status(&self) -> Option<u16> {
        self.outcome.as_ref().ok().map(|r| r.status)
    }

    pub fn body(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(|r| r.body.as_str())
    }

    pub fn response(&self) -> Option<&FetchResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        self.outcome.as_ref().err()
    }
}
