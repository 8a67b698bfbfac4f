use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

use crate::core::comparator::DifferentialComparator;
use crate::core::form::{dedup_forms, Form};
use crate::core::marker::MarkerFactory;
use crate::core::report::ScanReport;
use crate::core::result_aggregator::{ReportParts, ResultAggregator};
use crate::core::store::{ScanStore, StoredScan};
use crate::http::{FetcherConfig, RateLimitedFetcher};
use crate::modules::crawler::Crawler;
use crate::modules::dom::{CommandConfirmer, DisabledConfirmer, DomConfirmer};
use crate::modules::headers::check_headers;
use crate::modules::ports::PortScanner;
use crate::modules::sqli::SqliProbe;
use crate::modules::sqlmap::SqlmapRunner;
use crate::modules::xss::{XssConfig, XssProbe};
use crate::utils::payload_loader::PayloadLoader;
use crate::{validate_target, ScanConfig, SinkRef};

/// What a finished scan hands back.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub report: Arc<ScanReport>,
    pub report_path: Option<PathBuf>,
}

impl From<StoredScan> for ScanOutcome {
    fn from(stored: StoredScan) -> Self {
        Self {
            scan_id: stored.id,
            report: stored.report,
            report_path: stored.report_path,
        }
    }
}

/// Runs one full scan: ports, crawl, headers, XSS, basic SQLi and the
/// optional sqlmap pass, then writes and stores the report.
pub struct ScanEngine {
    config: ScanConfig,
    crawl_fetcher: Arc<RateLimitedFetcher>,
    probe_fetcher: Arc<RateLimitedFetcher>,
    comparator: Arc<DifferentialComparator>,
    markers: Arc<MarkerFactory>,
    payloads: Arc<PayloadLoader>,
    dom: Arc<dyn DomConfirmer>,
    ports: PortScanner,
    sqlmap: SqlmapRunner,
    store: ScanStore,
    sink: SinkRef,
    extra_forms: Vec<Form>,
}

impl ScanEngine {
    /// Validates `config` and builds the shared scan components.
    pub fn new(mut config: ScanConfig, store: ScanStore, sink: SinkRef) -> anyhow::Result<Self> {
        config.validate().context("invalid scan configuration")?;

        let crawl_fetcher = RateLimitedFetcher::new(config.fetcher_config()).context("failed to build HTTP client")?;
        let probe_fetcher = RateLimitedFetcher::new(FetcherConfig {
            max_in_flight: config.probe_concurrency.max(1),
            ..config.fetcher_config()
        })
        .context("failed to build HTTP client")?;

        let dom: Arc<dyn DomConfirmer> = match CommandConfirmer::parse(&config.dom_confirm) {
            Some(c) => Arc::new(c),
            None => Arc::new(DisabledConfirmer),
        };

        Ok(Self {
            crawl_fetcher: Arc::new(crawl_fetcher),
            probe_fetcher: Arc::new(probe_fetcher),
            comparator: Arc::new(DifferentialComparator::new(config.similarity_threshold)),
            markers: Arc::new(MarkerFactory::new()),
            payloads: Arc::new(PayloadLoader::with_xss_file(Some(&config.payloads))),
            dom,
            ports: PortScanner::new(),
            sqlmap: SqlmapRunner::new(&config.sqlmap_image),
            store,
            sink,
            extra_forms: Vec::new(),
            config,
        })
    }

    /// Forms supplied from outside the crawl, probed alongside discovered ones.
    pub fn with_forms(mut self, forms: Vec<Form>) -> Self {
        self.extra_forms = forms;
        self
    }

    pub fn with_dom_confirmer(mut self, dom: Arc<dyn DomConfirmer>) -> Self {
        self.dom = dom;
        self
    }

    pub fn with_port_scanner(mut self, ports: PortScanner) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_sqlmap_runner(mut self, runner: SqlmapRunner) -> Self {
        self.sqlmap = runner;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn store(&self) -> &ScanStore {
        &self.store
    }

    pub async fn run(&self, target: &str) -> anyhow::Result<ScanOutcome> {
        let url = validate_target(target)?;
        let target = url.as_str();
        let mut parts = ReportParts::default();
        info!("scan started: {}", target);

        if !self.config.skip_ports {
            self.sink.on_progress("Port scan", 0, 0);
            parts.ports = Some(self.ports.scan(&scan_host(&url)).await);
        }

        self.sink.on_progress("Crawling", 0, 0);
        let crawler = Crawler::new(Arc::clone(&self.crawl_fetcher))
            .with_idle_timeout(Duration::from_millis(self.config.idle_timeout_ms));
        let crawl = crawler
            .crawl(target, self.config.max_pages, self.config.concurrency)
            .await
            .with_context(|| format!("crawl of {} failed", target))?;
        self.sink.on_log(
            "info",
            &format!("[*] Crawled {} page(s), found {} form(s)", crawl.urls.len(), crawl.forms.len()),
        );

        if !self.config.skip_headers {
            parts.headers = Some(check_headers(&self.crawl_fetcher, target).await);
        }

        let mut forms = crawl.forms.clone();
        forms.extend(self.extra_forms.iter().cloned());
        let forms = dedup_forms(forms);
        let urls = crawl.urls.clone();
        parts.crawl = Some(crawl);

        self.sink.on_progress("XSS probes", 0, 0);
        let xss = Arc::new(
            XssProbe::new(
                Arc::clone(&self.probe_fetcher),
                Arc::clone(&self.comparator),
                Arc::clone(&self.markers),
                Arc::clone(&self.payloads),
                XssConfig {
                    probe_concurrency: self.config.probe_concurrency,
                    per_host_concurrency: self.config.per_host_concurrency,
                    retries: self.config.probe_retries,
                    ..XssConfig::default()
                },
            )
            .with_dom_confirmer(Arc::clone(&self.dom)),
        );
        let receiver = xss.stream(urls.clone(), forms.clone());
        parts.xss = ResultAggregator::run(receiver, Arc::clone(&self.sink)).await;

        self.sink.on_progress("SQLi probes", 0, 0);
        let sqli = SqliProbe::new(
            Arc::clone(&self.probe_fetcher),
            Arc::clone(&self.markers),
            Arc::clone(&self.payloads),
            self.config.probe_concurrency,
        );
        parts.sqli = sqli.scan(&urls).await;
        ResultAggregator::announce(&parts.sqli, &self.sink);

        if self.config.run_sqlmap {
            self.sink.on_progress("sqlmap", 0, 0);
            let report = self
                .sqlmap
                .run(target, &self.config.sqlmap_args, &forms)
                .await
                .context("sqlmap arguments rejected")?;
            parts.sqlmap = Some(report);
        }

        ResultAggregator::report_summary(&parts, &self.sink);

        let report = ScanReport::new(target, parts);
        let report_path = match report.write_to(Path::new(&self.config.output_dir)) {
            Ok(path) => {
                self.sink.on_log("success", &format!("[+] Report saved to {}", path.display()));
                Some(path)
            }
            Err(e) => {
                warn!("could not write report for {}: {}", target, e);
                self.sink.on_log("error", &format!("[!] Failed to write report: {}", e));
                None
            }
        };

        let stored = self.store.insert(report, report_path).await;
        info!("scan {} finished", stored.id);
        Ok(stored.into())
    }

    /// Scans each target in turn; one failing target does not stop the rest.
    pub async fn run_all(&self, targets: &[String]) -> Vec<anyhow::Result<ScanOutcome>> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            self.sink.on_progress("Target", i + 1, targets.len());
            let outcome = self.run(target).await;
            if let Err(e) = &outcome {
                self.sink.on_log("error", &format!("[!] {}: {:#}", target, e));
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Host as nmap and `TcpStream::connect` expect it: IPv6 without brackets.
fn scan_host(url: &url::Url) -> String {
    match url.host() {
        Some(url::Host::Domain(d)) => d.to_string(),
        Some(url::Host::Ipv4(a)) => a.to_string(),
        Some(url::Host::Ipv6(a)) => a.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConsoleSink;

    #[test]
    fn test_engine_rejects_bad_config() {
        let config = ScanConfig { max_pages: 0, ..Default::default() };
        let err = ScanEngine::new(config, ScanStore::default(), ConsoleSink::new_ref()).err().unwrap();
        assert!(format!("{:#}", err).contains("max_pages"));
    }

    #[test]
    fn test_engine_sanitizes_sqlmap_args() {
        let config = ScanConfig {
            sqlmap_args: vec![" --batch ".into()],
            ..Default::default()
        };
        let engine = ScanEngine::new(config, ScanStore::default(), ConsoleSink::new_ref()).unwrap();
        assert_eq!(engine.config().sqlmap_args, vec!["--batch".to_string()]);
    }

    #[tokio::test]
    async fn test_run_rejects_non_http_target() {
        let engine = ScanEngine::new(ScanConfig::default(), ScanStore::default(), ConsoleSink::new_ref()).unwrap();
        assert!(engine.run("file:///etc/passwd").await.is_err());
    }

    #[test]
    fn test_scan_host_strips_ipv6_brackets() {
        let v6 = url::Url::parse("http://[::1]:8080/path").unwrap();
        assert_eq!(v6.host_str(), Some("[::1]"));
        assert_eq!(scan_host(&v6), "::1");

        let v4 = url::Url::parse("http://127.0.0.1/").unwrap();
        assert_eq!(scan_host(&v4), "127.0.0.1");

        let named = url::Url::parse("https://example.com:8443/").unwrap();
        assert_eq!(scan_host(&named), "example.com");
    }
}
