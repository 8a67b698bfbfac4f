use std::collections::BTreeMap;

use serde::Serialize;

use crate::http::{FetchResponse, RateLimitedFetcher};

pub const REQUIRED_HEADERS: &[&str] = &[
    "Content-Security-Policy",
    "X-Frame-Options",
    "Strict-Transport-Security",
    "X-Content-Type-Options",
    "Referrer-Policy",
];

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HeaderReport {
    Checked {
        present: BTreeMap<String, String>,
        missing: Vec<String>,
    },
    Failed {
        error: String,
    },
}

impl HeaderReport {
    pub fn missing(&self) -> &[String] {
        match self {
            HeaderReport::Checked { missing, .. } => missing,
            HeaderReport::Failed { .. } => &[],
        }
    }
}

pub fn evaluate(response: &FetchResponse) -> HeaderReport {
    let missing = REQUIRED_HEADERS
        .iter()
        .filter(|h| response.header(h).is_none())
        .map(|h| h.to_string())
        .collect();
    HeaderReport::Checked {
        present: response.headers.iter().cloned().collect(),
        missing,
    }
}

/// GETs `target` and reports which security headers are absent.
pub async fn check_headers(fetcher: &RateLimitedFetcher, target: &str) -> HeaderReport {
    let result = fetcher.get(target).await;
    match &result.outcome {
        Ok(resp) => evaluate(resp),
        Err(failure) => HeaderReport::Failed { error: failure.to_string() },
    }
}
