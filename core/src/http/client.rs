use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{Client, ClientBuilder, Proxy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::{BodyType, FetchFailure, FetchRequest, FetchResponse, FetchResult, DEFAULT_USER_AGENT};
use crate::core::throttle::HostThrottle;
use crate::errors::ScanError;

const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_MAX_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub max_in_flight: usize,
    pub timeout: Duration,
    /// Total attempts per request, first try included.
    pub attempts: u32,
    pub host_spacing: Duration,
    pub user_agent: String,
    pub bearer_token: Option<String>,
    pub cookies: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            timeout: Duration::from_secs(10),
            attempts: 2,
            host_spacing: Duration::from_millis(200),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            bearer_token: None,
            cookies: Vec::new(),
            headers: Vec::new(),
            proxy: None,
        }
    }
}

/// Bounded, retrying, per-host throttled HTTP issuer.
///
/// `fetch` never returns an error: transport failures end up in
/// `FetchResult::outcome`. HTTP error statuses are normal responses.
pub struct RateLimitedFetcher {
    inner: Client,
    config: FetcherConfig,
    default_headers: HeaderMap,
    in_flight: Arc<Semaphore>,
    throttle: HostThrottle,
}

impl RateLimitedFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, ScanError> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = config.proxy.as_deref() {
            let p = Proxy::all(proxy)
                .map_err(|e| ScanError::config(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(p);
        }

        let inner = builder
            .build()
            .map_err(|e| ScanError::config(format!("failed to build HTTP client: {}", e)))?;

        let mut default_headers = HeaderMap::new();
        for (key, val) in &config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(val),
            ) {
                default_headers.insert(name, value);
            }
        }
        if let Ok(ua) = HeaderValue::from_str(&config.user_agent) {
            default_headers.insert(USER_AGENT, ua);
        }
        if let Some(token) = config.bearer_token.as_deref() {
            if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                default_headers.insert(AUTHORIZATION, auth);
            }
        }

        Ok(Self {
            inner,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            throttle: HostThrottle::new(config.host_spacing),
            default_headers,
            config,
        })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub async fn get(&self, url: &str) -> FetchResult {
        match url::Url::parse(url) {
            Ok(u) => self.fetch(&FetchRequest::get(u)).await,
            Err(e) => FetchResult {
                url: url.to_string(),
                outcome: Err(FetchFailure::InvalidUrl(e.to_string())),
                elapsed: Duration::ZERO,
                attempts: 0,
            },
        }
    }

    pub async fn post_form(&self, url: &url::Url, fields: &[(String, String)]) -> FetchResult {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        self.fetch(&FetchRequest::post(url.clone(), body, BodyType::FormUrlEncoded)).await
    }

    pub async fn post_json(&self, url: &url::Url, value: &serde_json::Value) -> FetchResult {
        let body = value.to_string();
        self.fetch(&FetchRequest::post(url.clone(), body, BodyType::Json)).await
    }

    /// Issues `req`, retrying timeouts, connection errors and 5xx responses
    /// with exponential backoff. Every attempt books its own host slot.
    pub async fn fetch(&self, req: &FetchRequest) -> FetchResult {
        let start = Instant::now();
        let host = req.host_key();
        let max_attempts = self.config.attempts.max(1);
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;

            // Host spacing is waited out before a global slot is taken. If the
            // global budget then blocks, the host slot is booked again.
            self.throttle.wait(&host).await;
            let result = {
                let _permit = match self.in_flight.try_acquire() {
                    Ok(p) => p,
                    Err(_) => match self.in_flight.acquire().await {
                        Ok(p) => {
                            self.throttle.wait(&host).await;
                            p
                        }
                        Err(e) => break Err(FetchFailure::Protocol(e.to_string())),
                    },
                };
                self.send_once(req).await
            };

            let retry = match &result {
                Ok(resp) => resp.status >= 500,
                Err(failure) => failure.is_retryable(),
            };

            if !retry || attempts >= max_attempts {
                break result;
            }

            let backoff = exponential_backoff_ms(BACKOFF_BASE_MS, BACKOFF_MAX_MS, attempts);
            debug!(
                "retrying {} {} in {}ms (attempt {}/{})",
                req.method, req.url, backoff, attempts + 1, max_attempts
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        };

        FetchResult {
            url: req.url.to_string(),
            outcome,
            elapsed: start.elapsed(),
            attempts,
        }
    }

    async fn send_once(&self, req: &FetchRequest) -> Result<FetchResponse, FetchFailure> {
        let mut builder = self
            .inner
            .request(req.method.clone(), req.url.as_str())
            .headers(self.merged_headers(req));

        if let Some(cookie) = self.merged_cookie_header(req) {
            builder = builder.header(COOKIE, cookie);
        }

        if !req.body.is_empty() {
            if !req.headers.contains_key(CONTENT_TYPE) {
                if let Some(ct) = req.body_type.content_type() {
                    builder = builder.header(CONTENT_TYPE, ct);
                }
            }
            builder = builder.body(req.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        Ok(FetchResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Defaults first, then caller headers on top.
    fn merged_headers(&self, req: &FetchRequest) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        for (name, value) in req.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers.remove(COOKIE);
        headers
    }

    /// Cookie pairs from the default `Cookie` header and configured cookies,
    /// overridden by the request's own `Cookie` header and cookie list.
    fn merged_cookie_header(&self, req: &FetchRequest) -> Option<String> {
        let mut defaults = parse_cookie_header(self.default_headers.get(COOKIE));
        defaults.extend(self.config.cookies.iter().cloned());
        let mut caller = parse_cookie_header(req.headers.get(COOKIE));
        caller.extend(req.cookies.iter().cloned());

        let merged = merge_cookies(&defaults, &caller);
        if merged.is_empty() {
            return None;
        }
        Some(
            merged
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Merges cookie lists preserving first-seen order; `overrides` win on
/// name collision.
pub fn merge_cookies(defaults: &[(String, String)], overrides: &[(String, String)]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for (name, value) in defaults.iter().chain(overrides.iter()) {
        match merged.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.clone(),
            None => merged.push((name.clone(), value.clone())),
        }
    }
    merged
}

fn parse_cookie_header(value: Option<&HeaderValue>) -> Vec<(String, String)> {
    let raw = match value.and_then(|v| v.to_str().ok()) {
        Some(raw) => raw,
        None => return Vec::new(),
    };
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// base * 2^(attempt-1), capped.
fn exponential_backoff_ms(base: u64, max: u64, attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u64 << exp).min(max)
}
