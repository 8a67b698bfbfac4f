use std::collections::HashSet;

use serde::Serialize;
use tokio::sync::mpsc;
use url::Url;

use crate::core::finding::ProbeFinding;
use crate::modules::crawler::CrawlResult;
use crate::modules::headers::HeaderReport;
use crate::modules::ports::PortReport;
use crate::modules::runner::ToolReport;
use crate::modules::sqlmap::SqlmapFinding;
use crate::SinkRef;

/// Everything one scan produced; serialized as the report's `results`.
/// Skipped stages serialize as `null`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportParts {
    pub ports: Option<PortReport>,
    pub crawl: Option<CrawlResult>,
    pub headers: Option<HeaderReport>,
    pub xss: Vec<ProbeFinding>,
    pub sqli: Vec<ProbeFinding>,
    pub sqlmap: Option<ToolReport<SqlmapFinding>>,
}

impl ReportParts {
    pub fn hits(&self) -> impl Iterator<Item = &ProbeFinding> {
        self.xss.iter().chain(self.sqli.iter()).filter(|f| f.is_hit())
    }
}

/// Builds a deduplication key from URL base path + kind + parameters.
fn build_dedup_key(finding: &ProbeFinding) -> String {
    let base_url = match Url::parse(&finding.url) {
        Ok(parsed) => format!("{}://{}{}", parsed.scheme(), parsed.host_str().unwrap_or(""), parsed.path()),
        Err(_) => finding.url.clone(),
    };
    format!("{}|{}|{}", base_url, finding.kind, finding.params.join(","))
}

/// Collects probe findings and reports the interesting ones.
pub struct ResultAggregator;

impl ResultAggregator {
    /// Drains a finding stream, announcing each hit through `sink` as it
    /// arrives. Every finding is kept.
    pub async fn run(mut receiver: mpsc::Receiver<ProbeFinding>, sink: SinkRef) -> Vec<ProbeFinding> {
        let mut findings = Vec::new();
        while let Some(finding) = receiver.recv().await {
            if finding.is_hit() {
                sink.on_finding(&finding);
            }
            findings.push(finding);
        }
        findings
    }

    pub fn announce(findings: &[ProbeFinding], sink: &SinkRef) {
        for f in findings.iter().filter(|f| f.is_hit()) {
            sink.on_finding(f);
        }
    }

    /// One line per distinct (location, kind, parameters) hit.
    pub fn report_summary(parts: &ReportParts, sink: &SinkRef) {
        let mut seen = HashSet::new();
        let hits: Vec<&ProbeFinding> = parts.hits().filter(|f| seen.insert(build_dedup_key(f))).collect();

        if hits.is_empty() {
            sink.on_log("success", "[+] No reflected or suspected parameters found.");
        } else {
            sink.on_log("warn", &format!("[+] {} finding(s) discovered:", hits.len()));
            for (i, f) in hits.iter().enumerate() {
                sink.on_log("error", &format!("  #{} {}", i + 1, f.describe()));
            }
        }

        if let Some(headers) = &parts.headers {
            let missing = headers.missing();
            if !missing.is_empty() {
                sink.on_log("warn", &format!("[!] Missing security headers: {}", missing.join(", ")));
            }
        }

        if let Some(ports) = &parts.ports {
            let open = ports.open_ports();
            if !open.is_empty() {
                let list: Vec<String> = open.iter().map(u16::to_string).collect();
                sink.on_log("info", &format!("[*] Open ports: {}", list.join(", ")));
            }
        }

        if let Some(sqlmap) = &parts.sqlmap {
            if sqlmap.ok {
                for f in &sqlmap.findings {
                    sink.on_log("error", &format!("  [sqlmap] [{}] {}", f.level, f.message));
                }
            } else if let Some(err) = &sqlmap.error {
                sink.on_log("warn", &format!("[!] sqlmap did not complete: {}", err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comparator::{Classification, Evidence, Verdict};
    use crate::core::finding::ProbeKind;
    use crate::ScanEventSink;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        logs: Mutex<Vec<(String, String)>>,
        findings: Mutex<Vec<String>>,
    }

    impl ScanEventSink for RecordingSink {
        fn on_log(&self, level: &str, message: &str) {
            self.logs.lock().unwrap().push((level.to_string(), message.to_string()));
        }
        fn on_finding(&self, finding: &ProbeFinding) {
            self.findings.lock().unwrap().push(finding.url.clone());
        }
        fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
    }

    fn finding(url: &str, classification: Classification) -> ProbeFinding {
        let verdict = Verdict {
            classification,
            evidence: Evidence::None,
            similarity: None,
            status: Some(200),
            error: None,
            attempts: 1,
        };
        ProbeFinding::from_verdict(ProbeKind::Xss, url, "get", vec!["q".into()], None, None, verdict)
    }

    #[tokio::test]
    async fn test_run_keeps_all_and_announces_hits() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        tx.send(finding("http://t/?q=1", Classification::Reflected)).await.unwrap();
        tx.send(finding("http://t/?q=2", Classification::Clean)).await.unwrap();
        drop(tx);

        let all = ResultAggregator::run(rx, sink.clone()).await;
        assert_eq!(all.len(), 2);
        assert_eq!(*sink.findings.lock().unwrap(), vec!["http://t/?q=1".to_string()]);
    }

    #[test]
    fn test_summary_dedups_same_location() {
        let sink = Arc::new(RecordingSink::default());
        let parts = ReportParts {
            xss: vec![
                finding("http://t/p?q=<a>", Classification::Reflected),
                finding("http://t/p?q=<b>", Classification::Reflected),
                finding("http://t/p?q=c", Classification::Clean),
            ],
            ..Default::default()
        };
        let sink_ref: SinkRef = sink.clone();
        ResultAggregator::report_summary(&parts, &sink_ref);

        let logs = sink.logs.lock().unwrap();
        assert_eq!(logs[0].1, "[+] 1 finding(s) discovered:");
        assert_eq!(logs.len(), 2);
    }

    #[test]
    fn test_summary_without_hits() {
        let sink = Arc::new(RecordingSink::default());
        let sink_ref: SinkRef = sink.clone();
        ResultAggregator::report_summary(&ReportParts::default(), &sink_ref);
        assert_eq!(sink.logs.lock().unwrap()[0].0, "success");
    }
}
