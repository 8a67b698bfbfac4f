use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info};
use url::Url;

use crate::core::comparator::{status_or_length_change, Classification, Evidence, Verdict};
use crate::core::finding::{ProbeFinding, ProbeKind};
use crate::core::marker::MarkerFactory;
use crate::core::mutator::{append_to_query_param, query_param_names};
use crate::http::{FetchRequest, FetchResponse, RateLimitedFetcher};
use crate::utils::payload_loader::PayloadLoader;

/// Request header that carries the attempt marker. Keeping it out of the
/// query leaves response lengths comparable with the baseline.
pub const PROBE_HEADER: &str = "x-webscanner-probe";

/// Basic-mode SQL injection probe: appends quote/boolean payloads to each
/// query parameter and flags 5xx responses or body length changes.
pub struct SqliProbe {
    fetcher: Arc<RateLimitedFetcher>,
    markers: Arc<MarkerFactory>,
    payloads: Arc<PayloadLoader>,
    concurrency: usize,
}

impl SqliProbe {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        markers: Arc<MarkerFactory>,
        payloads: Arc<PayloadLoader>,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            markers,
            payloads,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn scan(&self, urls: &[String]) -> Vec<ProbeFinding> {
        let mut targets: Vec<Url> = urls
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .filter(|u| u.query().map_or(false, |q| !q.is_empty()))
            .collect();
        targets.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        targets.dedup();
        info!("sqli: {} url(s) with query parameters", targets.len());

        stream::iter(targets)
            .map(|url| async move { self.probe_url(&url).await })
            .buffer_unordered(self.concurrency)
            .flat_map(stream::iter)
            .collect()
            .await
    }

    /// One finding per query parameter of `url`.
    pub async fn probe_url(&self, url: &Url) -> Vec<ProbeFinding> {
        let baseline = match self.fetcher.fetch(&FetchRequest::get(url.clone())).await.outcome {
            Ok(resp) => Some(resp),
            Err(e) => {
                debug!("sqli: baseline failed for {}: {}", url, e);
                None
            }
        };

        let mut findings = Vec::new();
        for param in query_param_names(url) {
            findings.push(self.probe_param(url, &param, baseline.as_ref()).await);
        }
        findings
    }

    async fn probe_param(&self, url: &Url, param: &str, baseline: Option<&FetchResponse>) -> ProbeFinding {
        let mut attempts = 0;
        let mut last_status = None;
        let mut last_error = None;

        for payload in &self.payloads.sqli_payloads {
            let marker = self.markers.next();
            let target = append_to_query_param(url, param, payload);
            let request = FetchRequest::get(target).with_header(PROBE_HEADER, marker.as_str());
            let result = self.fetcher.fetch(&request).await;
            attempts += result.attempts;

            match &result.outcome {
                Ok(resp) => {
                    last_status = Some(resp.status);
                    if let Some(evidence) = status_or_length_change(baseline, resp) {
                        let verdict = Verdict {
                            classification: Classification::Suspected,
                            evidence,
                            similarity: None,
                            status: Some(resp.status),
                            error: None,
                            attempts,
                        };
                        return ProbeFinding::from_verdict(
                            ProbeKind::Sqli,
                            request.url.as_str(),
                            "get",
                            vec![param.to_string()],
                            Some(payload.clone()),
                            Some(marker),
                            verdict,
                        );
                    }
                }
                Err(failure) => last_error = Some(failure.to_string()),
            }
        }

        let (classification, error) = if last_status.is_some() {
            (Classification::Clean, None)
        } else {
            (
                Classification::Error,
                Some(last_error.unwrap_or_else(|| "no payloads configured".to_string())),
            )
        };
        let verdict = Verdict {
            classification,
            evidence: Evidence::None,
            similarity: None,
            status: last_status,
            error,
            attempts,
        };
        ProbeFinding::from_verdict(ProbeKind::Sqli, url.as_str(), "get", vec![param.to_string()], None, None, verdict)
    }
}
