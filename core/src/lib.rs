pub mod core;
pub mod errors;
pub mod http;
pub mod modules;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use crate::core::engine::{ScanEngine, ScanOutcome};
pub use crate::core::finding::{ProbeFinding, ProbeKind};
pub use crate::core::form::{ingest_forms_json, Form};
pub use crate::core::report::ScanReport;
pub use crate::core::result_aggregator::{ReportParts, ResultAggregator};
pub use crate::core::store::ScanStore;
pub use crate::errors::ScanError;
pub use crate::http::{FetcherConfig, RateLimitedFetcher};
pub use crate::modules::crawler::{CrawlResult, Crawler};
pub use crate::utils::read_lines;

pub const MAX_PAGES_LIMIT: usize = 50;
pub const MAX_CONCURRENCY_LIMIT: usize = 32;

/// Shared scan configuration used by the CLI and embedders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub target: String,
    pub list_file: String,
    pub max_pages: usize,
    /// Crawl workers and fetcher in-flight budget.
    pub concurrency: usize,
    pub probe_concurrency: usize,
    pub per_host_concurrency: usize,
    /// Per-attempt timeout, seconds.
    pub timeout: u64,
    /// Total fetch attempts per request.
    pub attempts: u32,
    pub host_spacing_ms: u64,
    pub idle_timeout_ms: u64,
    pub similarity_threshold: f64,
    /// Extra XSS attempts after the first.
    pub probe_retries: u32,
    pub user_agent: String,
    pub bearer_token: Option<String>,
    /// `name=value; name2=value2`
    pub cookies: String,
    /// `Header: value; Other: value`
    pub headers: String,
    pub proxy: String,
    pub payloads: String,
    pub output_dir: String,
    pub run_sqlmap: bool,
    pub sqlmap_image: String,
    pub sqlmap_args: Vec<String>,
    /// Browser harness command; empty disables DOM confirmation.
    pub dom_confirm: String,
    pub skip_ports: bool,
    pub skip_headers: bool,
    pub verbose: bool,
    pub dry_run: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            list_file: String::new(),
            max_pages: MAX_PAGES_LIMIT,
            concurrency: 5,
            probe_concurrency: 10,
            per_host_concurrency: 4,
            timeout: 10,
            attempts: 2,
            host_spacing_ms: 200,
            idle_timeout_ms: 2000,
            similarity_threshold: crate::core::comparator::DEFAULT_SIMILARITY_THRESHOLD,
            probe_retries: 2,
            user_agent: crate::http::DEFAULT_USER_AGENT.to_string(),
            bearer_token: None,
            cookies: String::new(),
            headers: String::new(),
            proxy: String::new(),
            payloads: String::new(),
            output_dir: "/tmp/scan_reports".to_string(),
            run_sqlmap: false,
            sqlmap_image: crate::modules::sqlmap::DEFAULT_SQLMAP_IMAGE.to_string(),
            sqlmap_args: Vec::new(),
            dom_confirm: String::new(),
            skip_ports: false,
            skip_headers: false,
            verbose: false,
            dry_run: false,
        }
    }
}

impl ScanConfig {
    /// Reads a JSON config file; missing keys keep their defaults.
    pub fn from_file(path: &str) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Applies `WEBSCANNER_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ScanError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("WEBSCANNER_OUTPUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.output_dir = dir.trim().to_string();
        }
        if let Some(v) = lookup("WEBSCANNER_MAX_PAGES") {
            self.max_pages = v
                .trim()
                .parse()
                .map_err(|_| ScanError::config(format!("WEBSCANNER_MAX_PAGES is not a number: {}", v)))?;
        }
        if let Some(v) = lookup("WEBSCANNER_MAX_CONCURRENCY") {
            self.concurrency = v
                .trim()
                .parse()
                .map_err(|_| ScanError::config(format!("WEBSCANNER_MAX_CONCURRENCY is not a number: {}", v)))?;
        }
        if let Some(v) = lookup("WEBSCANNER_USE_SQLMAP") {
            self.run_sqlmap = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(image) = lookup("WEBSCANNER_SQLMAP_IMAGE").filter(|v| !v.trim().is_empty()) {
            self.sqlmap_image = image.trim().to_string();
        }
        Ok(())
    }

    /// Bounds checks and sqlmap argument sanitization. Any error here fails
    /// the scan before a request is sent.
    pub fn validate(&mut self) -> Result<(), ScanError> {
        if !self.target.is_empty() {
            validate_target(&self.target)?;
        }
        if self.max_pages == 0 || self.max_pages > MAX_PAGES_LIMIT {
            return Err(ScanError::config(format!("max_pages must be in 1..={}", MAX_PAGES_LIMIT)));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY_LIMIT {
            return Err(ScanError::config(format!("concurrency must be in 1..={}", MAX_CONCURRENCY_LIMIT)));
        }
        if self.probe_concurrency == 0 || self.per_host_concurrency == 0 {
            return Err(ScanError::config("probe concurrency limits must be at least 1"));
        }
        if self.attempts == 0 {
            return Err(ScanError::config("attempts must be at least 1"));
        }
        if self.timeout == 0 {
            return Err(ScanError::config("timeout must be at least 1 second"));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ScanError::config("similarity_threshold must be in (0, 1]"));
        }
        self.sqlmap_args = crate::modules::sqlmap::sanitize_args(&self.sqlmap_args)?;
        Ok(())
    }

    pub fn header_list(&self) -> Vec<String> {
        split_list(&self.headers)
    }

    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        parse_custom_headers(&self.header_list())
    }

    pub fn cookie_list(&self) -> Vec<(String, String)> {
        split_list(&self.cookies)
            .iter()
            .filter_map(|c| {
                let (k, v) = c.split_once('=')?;
                let k = k.trim();
                if k.is_empty() { None } else { Some((k.to_string(), v.trim().to_string())) }
            })
            .collect()
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        if self.proxy.is_empty() { None } else { Some(&self.proxy) }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            max_in_flight: self.concurrency.max(1),
            timeout: Duration::from_secs(self.timeout),
            attempts: self.attempts,
            host_spacing: Duration::from_millis(self.host_spacing_ms),
            user_agent: self.user_agent.clone(),
            bearer_token: self.bearer_token.clone().filter(|t| !t.is_empty()),
            cookies: self.cookie_list(),
            headers: self.parsed_headers(),
            proxy: self.proxy_ref().map(str::to_string),
        }
    }
}

pub fn validate_target(target: &str) -> Result<url::Url, ScanError> {
    let url = url::Url::parse(target.trim())
        .map_err(|e| ScanError::config(format!("invalid target '{}': {}", target, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ScanError::config(format!("target must be an http(s) URL: {}", target)));
    }
    Ok(url)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter().filter_map(|h| {
        let mut parts = h.splitn(2, ':');
        let key = parts.next()?.trim().to_string();
        let val = parts.next().unwrap_or("").trim().to_string();
        if key.is_empty() { return None; }
        Some((key, val))
    }).collect()
}

/// Output abstraction for the scan pipeline.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, finding: &ProbeFinding);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        let colored = match level {
            "success" => message.green().to_string(),
            "error"   => message.red().to_string(),
            "warn"    => message.yellow().to_string(),
            "phase"   => message.bright_cyan().bold().to_string(),
            _         => message.to_string(),
        };
        println!("{}", colored);
    }

    fn on_finding(&self, finding: &ProbeFinding) {
        use colored::*;
        println!(
            "\n{} {} {}!",
            "[+]".green().bold(),
            finding.kind.to_string().red().bold(),
            finding.classification.to_string().red()
        );
        println!("    Target:  {} {}", finding.method, finding.url.white());
        println!("    Params:  {}", finding.params.join(", ").bright_yellow());
        if let Some(payload) = &finding.payload {
            println!("    Payload: {}", payload.bright_yellow());
        }
        let similarity = finding.similarity.map_or_else(|| "N/A".to_string(), |s| format!("{:.3}", s));
        let status = finding.status.map_or_else(|| "N/A".to_string(), |s| s.to_string());
        println!(
            "    Info:    Status [{}] | Evidence [{:?}] | Similarity [{}]",
            status.cyan(),
            finding.evidence,
            similarity.dimmed()
        );
        if let Some(fired) = finding.dom_executed {
            println!("    DOM:     {}", if fired { "executed".red().bold() } else { "not executed".dimmed() });
        }
        println!("{}", "──────────────────────────────────────────".dimmed());
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        if total > 0 {
            println!("{}", format!("[*] {} ({}/{})", phase, current, total).bright_cyan());
        } else {
            println!("{}", format!("[*] {}", phase).bright_cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.max_pages, 50);
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.output_dir, "/tmp/scan_reports");
        assert_eq!(cfg.sqlmap_image, "spsproject-sqlmap:latest");
        assert!(!cfg.run_sqlmap);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: ScanConfig = serde_json::from_str(r#"{"target": "http://t/", "maxPages": 7, "runSqlmap": true}"#).unwrap();
        assert_eq!(cfg.max_pages, 7);
        assert!(cfg.run_sqlmap);
        assert_eq!(cfg.probe_concurrency, 10);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WEBSCANNER_OUTPUT_DIR", "/var/reports"),
            ("WEBSCANNER_MAX_PAGES", "12"),
            ("WEBSCANNER_USE_SQLMAP", "Yes"),
            ("WEBSCANNER_SQLMAP_IMAGE", "sqlmap:dev"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ScanConfig::default();
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.output_dir, "/var/reports");
        assert_eq!(cfg.max_pages, 12);
        assert!(cfg.run_sqlmap);
        assert_eq!(cfg.sqlmap_image, "sqlmap:dev");
        assert_eq!(cfg.concurrency, 5);
    }

    #[test]
    fn test_env_rejects_garbage_numbers() {
        let mut cfg = ScanConfig::default();
        let err = cfg
            .apply_env_from(|k| (k == "WEBSCANNER_MAX_CONCURRENCY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validate_bounds() {
        let mut cfg = ScanConfig { target: "http://t/".into(), ..Default::default() };
        assert!(cfg.validate().is_ok());

        cfg.max_pages = 51;
        assert!(cfg.validate().is_err());
        cfg.max_pages = 10;

        cfg.concurrency = 0;
        assert!(cfg.validate().is_err());
        cfg.concurrency = 3;

        cfg.target = "ftp://t/".into();
        assert!(cfg.validate().is_err());
        cfg.target = "http://t/".into();

        cfg.sqlmap_args = vec!["--os-shell".into()];
        assert!(cfg.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_fetcher_config_from_scan_config() {
        let cfg = ScanConfig {
            headers: "X-Api: 1; Accept: text/html".into(),
            cookies: "session=abc; theme=dark; junk".into(),
            bearer_token: Some(String::new()),
            ..Default::default()
        };
        let fc = cfg.fetcher_config();
        assert_eq!(fc.headers, vec![("X-Api".to_string(), "1".to_string()), ("Accept".to_string(), "text/html".to_string())]);
        assert_eq!(fc.cookies.len(), 2);
        assert!(fc.bearer_token.is_none());
        assert_eq!(fc.host_spacing, Duration::from_millis(200));
    }
}
