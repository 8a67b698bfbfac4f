use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{debug, info};
use tokio::sync::mpsc;
use url::Url;

use crate::core::comparator::{Classification, DifferentialComparator, Evidence, Verdict};
use crate::core::finding::{ProbeFinding, ProbeKind};
use crate::core::form::{dedup_forms, Form};
use crate::core::marker::MarkerFactory;
use crate::core::mutator::{form_get_url, form_post_request, inject_query_param, query_param_names};
use crate::core::throttle::HostLimiter;
use crate::http::{FetchRequest, RateLimitedFetcher};
use crate::modules::dom::{DisabledConfirmer, DomConfirmer, DEFAULT_DOM_WAIT};
use crate::utils::payload_loader::{render, PayloadLoader};

#[derive(Debug, Clone)]
pub struct XssConfig {
    pub probe_concurrency: usize,
    pub per_host_concurrency: usize,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub dom_wait: Duration,
}

impl Default for XssConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: 10,
            per_host_concurrency: 4,
            retries: 2,
            dom_wait: DEFAULT_DOM_WAIT,
        }
    }
}

/// One injectable location.
#[derive(Debug, Clone)]
pub enum XssTarget {
    /// A query parameter of `url`; `url` is also the baseline.
    Query { url: Url, param: String },
    /// Every input of a POST form; the baseline is a GET of the action.
    PostForm { form: Form },
}

impl XssTarget {
    fn baseline_url(&self) -> String {
        match self {
            XssTarget::Query { url, .. } => url.to_string(),
            XssTarget::PostForm { form } => form.action.clone(),
        }
    }

    fn params(&self) -> Vec<String> {
        match self {
            XssTarget::Query { param, .. } => vec![param.clone()],
            XssTarget::PostForm { form } => form.inputs.names().map(str::to_string).collect(),
        }
    }
}

/// Every query parameter of every URL and GET form, plus every POST form.
pub fn collect_targets(urls: &[String], forms: &[Form]) -> Vec<XssTarget> {
    let mut targets = Vec::new();
    let mut seen_urls = std::collections::HashSet::new();

    let get_form_urls = forms.iter().filter(|f| !f.is_post()).filter_map(form_get_url);
    let page_urls = urls.iter().filter_map(|u| Url::parse(u).ok());

    for url in page_urls.chain(get_form_urls) {
        if !seen_urls.insert(url.to_string()) {
            continue;
        }
        for param in query_param_names(&url) {
            targets.push(XssTarget::Query { url: url.clone(), param });
        }
    }

    for form in dedup_forms(forms.iter().filter(|f| f.is_post()).cloned().collect()) {
        targets.push(XssTarget::PostForm { form });
    }
    targets
}

/// Reflected-XSS prober built on differential comparison against a baseline.
pub struct XssProbe {
    fetcher: Arc<RateLimitedFetcher>,
    comparator: Arc<DifferentialComparator>,
    markers: Arc<MarkerFactory>,
    payloads: Arc<PayloadLoader>,
    dom: Arc<dyn DomConfirmer>,
    limiter: HostLimiter,
    config: XssConfig,
}

impl XssProbe {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        comparator: Arc<DifferentialComparator>,
        markers: Arc<MarkerFactory>,
        payloads: Arc<PayloadLoader>,
        config: XssConfig,
    ) -> Self {
        Self {
            fetcher,
            comparator,
            markers,
            payloads,
            dom: Arc::new(DisabledConfirmer),
            limiter: HostLimiter::new(config.per_host_concurrency),
            config,
        }
    }

    pub fn with_dom_confirmer(mut self, dom: Arc<dyn DomConfirmer>) -> Self {
        self.dom = dom;
        self
    }

    /// Probes everything and returns the findings in completion order.
    pub async fn scan(&self, urls: &[String], forms: &[Form]) -> Vec<ProbeFinding> {
        let (tx, mut rx) = mpsc::channel(64);
        let producer = self.run(urls, forms, tx);
        let collector = async {
            let mut findings = Vec::new();
            while let Some(f) = rx.recv().await {
                findings.push(f);
            }
            findings
        };
        let ((), findings) = tokio::join!(producer, collector);
        findings
    }

    /// Spawns the probe run and hands back the receiving end; findings arrive
    /// as each probe completes and the channel closes when all are done.
    pub fn stream(self: &Arc<Self>, urls: Vec<String>, forms: Vec<Form>) -> mpsc::Receiver<ProbeFinding> {
        let (tx, rx) = mpsc::channel(64);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(&urls, &forms, tx).await });
        rx
    }

    async fn run(&self, urls: &[String], forms: &[Form], tx: mpsc::Sender<ProbeFinding>) {
        let targets: Vec<Arc<XssTarget>> = collect_targets(urls, forms).into_iter().map(Arc::new).collect();
        if targets.is_empty() {
            debug!("xss: nothing to probe");
            return;
        }

        let baselines = self.fetch_baselines(&targets).await;
        let templates: Vec<Arc<str>> = self.payloads.xss_templates.iter().map(|p| Arc::from(p.as_str())).collect();

        // Owned, so the future spawned by `stream` is `Send`.
        let mut jobs: Vec<(Arc<XssTarget>, Arc<str>, Option<Arc<str>>)> = Vec::new();
        for target in &targets {
            let baseline = baselines.get(&target.baseline_url()).cloned().flatten();
            for template in &templates {
                jobs.push((Arc::clone(target), Arc::clone(template), baseline.clone()));
            }
        }
        info!("xss: {} target(s), {} probe(s)", targets.len(), jobs.len());

        let mut results = stream::iter(jobs)
            .map(|(target, template, baseline)| self.probe_job(target, template, baseline))
            .buffer_unordered(self.config.probe_concurrency.max(1));

        while let Some(finding) = results.next().await {
            if tx.send(finding).await.is_err() {
                debug!("xss: receiver dropped, stopping");
                break;
            }
        }
    }

    async fn fetch_baselines(&self, targets: &[Arc<XssTarget>]) -> HashMap<String, Option<Arc<str>>> {
        let mut unique: Vec<String> = targets.iter().map(|t| t.baseline_url()).collect();
        unique.sort();
        unique.dedup();

        stream::iter(unique)
            .map(|url| async move {
                let result = self.fetcher.get(&url).await;
                let body = match result.outcome {
                    Ok(resp) => Some(Arc::<str>::from(resp.body)),
                    Err(e) => {
                        debug!("xss: baseline failed for {}: {}", url, e);
                        None
                    }
                };
                (url, body)
            })
            .buffer_unordered(self.config.probe_concurrency.max(1))
            .collect()
            .await
    }

    async fn probe_job(&self, target: Arc<XssTarget>, template: Arc<str>, baseline: Option<Arc<str>>) -> ProbeFinding {
        self.probe(&target, &template, baseline.as_deref()).await
    }

    async fn probe(&self, target: &XssTarget, template: &str, baseline: Option<&str>) -> ProbeFinding {
        let marker = self.markers.next();
        let payload = render(template, &marker);

        let request = match target {
            XssTarget::Query { url, param } => Some(FetchRequest::get(inject_query_param(url, param, &payload))),
            XssTarget::PostForm { form } => form_post_request(form, &payload),
        };
        let Some(request) = request else {
            let verdict = Verdict {
                classification: Classification::Error,
                evidence: Evidence::None,
                similarity: None,
                status: None,
                error: Some("form action is not a valid URL".to_string()),
                attempts: 0,
            };
            return ProbeFinding::from_verdict(
                ProbeKind::Xss,
                target.baseline_url(),
                "post",
                target.params(),
                Some(payload),
                Some(marker),
                verdict,
            );
        };

        let verdict = {
            let _permit = self.limiter.acquire(&request.host_key()).await;
            let mut session = self.comparator.session(&marker, baseline);
            for _ in 0..=self.config.retries {
                let result = self.fetcher.fetch(&request).await;
                if session.observe(&result) {
                    break;
                }
            }
            session.finish()
        };

        let mut finding = ProbeFinding::from_verdict(
            ProbeKind::Xss,
            request.url.as_str(),
            request.method.as_str(),
            target.params(),
            Some(payload),
            Some(marker),
            verdict,
        );

        if finding.is_hit() && matches!(target, XssTarget::Query { .. }) {
            finding.dom_executed = self.dom.confirm(&finding.url, self.config.dom_wait).await;
        }
        finding
    }
}
