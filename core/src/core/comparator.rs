use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::core::marker::Marker;
use crate::http::{FetchResponse, FetchResult};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.98;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Reflected,
    Suspected,
    Clean,
    Error,
}

impl Classification {
    pub fn is_hit(&self) -> bool {
        matches!(self, Classification::Reflected | Classification::Suspected)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Reflected => write!(f, "reflected"),
            Classification::Suspected => write!(f, "suspected"),
            Classification::Clean => write!(f, "clean"),
            Classification::Error => write!(f, "error"),
        }
    }
}

/// What tipped the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Evidence {
    Marker,
    Similarity,
    Status,
    Length,
    None,
}

/// Final decision for one probe attempt (retries folded in).
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub classification: Classification,
    pub evidence: Evidence,
    pub similarity: Option<f64>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Response normalization and similarity scoring shared by the probes.
pub struct DifferentialComparator {
    threshold: f64,
    script_block: Regex,
    style_block: Regex,
    timestamp: Regex,
    long_number: Regex,
    long_id_attr: Regex,
    nonce: Regex,
    whitespace: Regex,
}

impl DifferentialComparator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            script_block: static_regex(r"(?is)<script\b[^>]*>.*?</script\s*>"),
            style_block: static_regex(r"(?is)<style\b[^>]*>.*?</style\s*>"),
            timestamp: static_regex(
                r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2})?(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            ),
            long_number: static_regex(r"\b\d{6,}\b"),
            long_id_attr: static_regex(r#"id="[^"]{8,}""#),
            nonce: static_regex(r"nonce-[A-Za-z0-9+/=_-]+"),
            whitespace: static_regex(r"\s+"),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Strips the parts of a page that change between identical requests.
    pub fn normalize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let text = self.script_block.replace_all(text, "");
        let text = self.style_block.replace_all(&text, "");
        let text = self.timestamp.replace_all(&text, "");
        let text = self.long_number.replace_all(&text, "");
        let text = self.long_id_attr.replace_all(&text, "");
        let text = self.nonce.replace_all(&text, "");
        let text = self.whitespace.replace_all(&text, " ");
        text.trim().to_string()
    }

    /// Normalizes both bodies and scores them.
    pub fn compare(&self, baseline: &str, probe: &str) -> f64 {
        similarity(&self.normalize(baseline), &self.normalize(probe))
    }

    /// Starts a retry session for one probe attempt.
    ///
    /// `baseline` is `None` when the baseline request failed; the session
    /// then decides on the literal marker alone.
    pub fn session<'a>(&'a self, marker: &'a Marker, baseline: Option<&str>) -> DifferentialSession<'a> {
        DifferentialSession {
            comparator: self,
            marker,
            baseline: baseline.map(|b| self.normalize(b)),
            lowest: None,
            last_status: None,
            last_failure: None,
            attempts: 0,
            responses: 0,
            marker_seen: false,
        }
    }
}

impl Default for DifferentialComparator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("normalization pattern must compile")
}

/// Accumulates evidence over the sequential attempts of one probe.
pub struct DifferentialSession<'a> {
    comparator: &'a DifferentialComparator,
    marker: &'a Marker,
    baseline: Option<String>,
    lowest: Option<f64>,
    last_status: Option<u16>,
    last_failure: Option<String>,
    attempts: u32,
    responses: u32,
    marker_seen: bool,
}

impl<'a> DifferentialSession<'a> {
    /// Records one attempt. Returns `true` once the outcome is decided and
    /// further attempts are pointless.
    pub fn observe(&mut self, result: &FetchResult) -> bool {
        self.attempts += 1;
        let response = match &result.outcome {
            Ok(resp) => resp,
            Err(failure) => {
                self.last_failure = Some(failure.to_string());
                return false;
            }
        };

        self.responses += 1;
        self.last_status = Some(response.status);

        if let Some(baseline) = &self.baseline {
            let sim = similarity(baseline, &self.comparator.normalize(&response.body));
            self.lowest = Some(match self.lowest {
                Some(low) if low <= sim => low,
                _ => sim,
            });
        }

        if response.body.contains(self.marker.as_str()) {
            self.marker_seen = true;
            return true;
        }
        false
    }

    pub fn finish(self) -> Verdict {
        if self.responses == 0 {
            return Verdict {
                classification: Classification::Error,
                evidence: Evidence::None,
                similarity: None,
                status: None,
                error: Some(self.last_failure.unwrap_or_else(|| "no attempt made".to_string())),
                attempts: self.attempts,
            };
        }

        let (classification, evidence) = if self.marker_seen {
            (Classification::Reflected, Evidence::Marker)
        } else if self.lowest.map_or(false, |s| s < self.comparator.threshold) {
            (Classification::Reflected, Evidence::Similarity)
        } else {
            (Classification::Clean, Evidence::None)
        };

        Verdict {
            classification,
            evidence,
            similarity: self.lowest,
            status: self.last_status,
            error: None,
            attempts: self.attempts,
        }
    }
}

/// Basic-mode SQLi heuristic: a 5xx or any change in body length.
///
/// Length comparison is skipped when there is no baseline body.
pub fn status_or_length_change(baseline: Option<&FetchResponse>, probe: &FetchResponse) -> Option<Evidence> {
    if probe.status >= 500 {
        return Some(Evidence::Status);
    }
    match baseline {
        Some(base) if base.body.chars().count() != probe.body.chars().count() => Some(Evidence::Length),
        _ => None,
    }
}

/// `2 * LCS / (|a| + |b|)` over characters; 1.0 for two empty strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    TextDiff::from_chars(a, b).ratio().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::marker::MarkerFactory;
    use crate::http::FetchFailure;
    use std::time::Duration;

    fn ok(status: u16, body: &str) -> FetchResult {
        FetchResult {
            url: "http://t/".into(),
            outcome: Ok(FetchResponse { status, headers: vec![], body: body.into() }),
            elapsed: Duration::from_millis(1),
            attempts: 1,
        }
    }

    fn failed() -> FetchResult {
        FetchResult {
            url: "http://t/".into(),
            outcome: Err(FetchFailure::Timeout),
            elapsed: Duration::from_millis(1),
            attempts: 2,
        }
    }

    fn naive_lcs(a: &[char], b: &[char]) -> usize {
        let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
        for i in 1..=a.len() {
            for j in 1..=b.len() {
                dp[i][j] = if a[i - 1] == b[j - 1] {
                    dp[i - 1][j - 1] + 1
                } else {
                    dp[i - 1][j].max(dp[i][j - 1])
                };
            }
        }
        dp[a.len()][b.len()]
    }

    fn naive_ratio(a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        (2 * naive_lcs(&a, &b)) as f64 / (a.len() + b.len()) as f64
    }

    #[test]
    fn test_similarity_matches_dynamic_programming() {
        let long_a = "the quick brown fox jumps over the lazy dog ".repeat(5);
        let long_b = "a quick brown cat leaps over one lazy dog! ".repeat(5);
        let cases = [
            ("", ""),
            ("abc", ""),
            ("abcbdab", "bdcaba"),
            ("hello world", "yellow word"),
            ("ab", "ba"),
            ("Hello", "Hello'"),
            (long_a.as_str(), long_b.as_str()),
        ];
        for (a, b) in cases {
            assert!((similarity(a, b) - naive_ratio(a, b)).abs() < 1e-6, "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_similarity_reflexive_and_symmetric() {
        let samples = ["", "Hello", "<p>Hello world</p>", "completely different"];
        for a in samples {
            assert_eq!(similarity(a, a), 1.0);
            for b in samples {
                assert_eq!(similarity(a, b), similarity(b, a));
                let s = similarity(a, b);
                assert!((0.0..=1.0).contains(&s));
            }
        }
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_normalize_strips_dynamic_content() {
        let cmp = DifferentialComparator::default();
        let page = r#"<html>
            <script type="text/javascript">var t = Date.now();</script>
            <style>body { color: red }</style>
            <p id="csrf-3f9a8b7c6d">Rendered at 2024-05-01T10:22:33Z</p>
            <span>order 12345678</span>   <b>nonce-abc123</b>
        </html>"#;
        let normalized = cmp.normalize(page);
        assert!(!normalized.contains("Date.now"));
        assert!(!normalized.contains("color: red"));
        assert!(!normalized.contains("2024-05-01"));
        assert!(!normalized.contains("12345678"));
        assert!(!normalized.contains("csrf-3f9a8b7c6d"));
        assert!(!normalized.contains("nonce-abc123"));
        assert!(!normalized.contains("  "));
        assert!(normalized.contains("<span>order </span>"));
    }

    #[test]
    fn test_short_numbers_and_ids_survive() {
        let cmp = DifferentialComparator::default();
        let normalized = cmp.normalize(r#"<div id="main">page 42 of 12345</div>"#);
        assert_eq!(normalized, r#"<div id="main">page 42 of 12345</div>"#);
    }

    #[test]
    fn test_dynamic_noise_compares_identical() {
        let cmp = DifferentialComparator::default();
        let a = "<p>Hello</p><small>req 99887766 at 2024-01-01T00:00:00</small>";
        let b = "<p>Hello</p><small>req 11223344 at 2025-06-30T12:59:59</small>";
        assert_eq!(cmp.compare(a, b), 1.0);
    }

    #[test]
    fn test_marker_short_circuits_session() {
        let cmp = DifferentialComparator::default();
        let marker = MarkerFactory::new().next();
        let mut session = cmp.session(&marker, Some("<p>Hello</p>"));

        let body = format!("<p>Hello {}</p>", marker);
        assert!(session.observe(&ok(200, &body)));

        let verdict = session.finish();
        assert_eq!(verdict.classification, Classification::Reflected);
        assert_eq!(verdict.evidence, Evidence::Marker);
        assert_eq!(verdict.attempts, 1);
    }

    #[test]
    fn test_lowest_similarity_wins() {
        let cmp = DifferentialComparator::new(0.98);
        let marker = MarkerFactory::new().next();
        let baseline = "<p>Welcome back to the shop</p>";
        let mut session = cmp.session(&marker, Some(baseline));

        assert!(!session.observe(&ok(200, baseline)));
        assert!(!session.observe(&ok(200, "<p>Something else entirely</p>")));
        assert!(!session.observe(&ok(200, baseline)));

        let verdict = session.finish();
        assert_eq!(verdict.classification, Classification::Reflected);
        assert_eq!(verdict.evidence, Evidence::Similarity);
        assert!(verdict.similarity.unwrap() < 0.98);
    }

    #[test]
    fn test_identical_responses_are_clean() {
        let cmp = DifferentialComparator::default();
        let marker = MarkerFactory::new().next();
        let mut session = cmp.session(&marker, Some("<p>same</p>"));
        session.observe(&ok(200, "<p>same</p>"));
        session.observe(&ok(200, "<p>same</p>"));

        let verdict = session.finish();
        assert_eq!(verdict.classification, Classification::Clean);
        assert_eq!(verdict.similarity, Some(1.0));
        assert_eq!(verdict.status, Some(200));
    }

    #[test]
    fn test_all_failures_is_error() {
        let cmp = DifferentialComparator::default();
        let marker = MarkerFactory::new().next();
        let mut session = cmp.session(&marker, Some("x"));
        session.observe(&failed());
        session.observe(&failed());

        let verdict = session.finish();
        assert_eq!(verdict.classification, Classification::Error);
        assert_eq!(verdict.error.as_deref(), Some("request timed out"));
        assert_eq!(verdict.attempts, 2);
    }

    #[test]
    fn test_missing_baseline_relies_on_marker_only() {
        let cmp = DifferentialComparator::default();
        let marker = MarkerFactory::new().next();
        let mut session = cmp.session(&marker, None);
        session.observe(&ok(200, "<p>anything</p>"));

        let verdict = session.finish();
        assert_eq!(verdict.classification, Classification::Clean);
        assert_eq!(verdict.similarity, None);
    }

    #[test]
    fn test_status_or_length_change() {
        let base = FetchResponse { status: 200, headers: vec![], body: "Hello".into() };
        let longer = FetchResponse { status: 200, headers: vec![], body: "Hello'".into() };
        let same = FetchResponse { status: 200, headers: vec![], body: "Jello".into() };
        let crashed = FetchResponse { status: 500, headers: vec![], body: "Hello".into() };

        assert_eq!(status_or_length_change(Some(&base), &longer), Some(Evidence::Length));
        assert_eq!(status_or_length_change(Some(&base), &same), None);
        assert_eq!(status_or_length_change(Some(&base), &crashed), Some(Evidence::Status));
        assert_eq!(status_or_length_change(None, &longer), None);
    }
}
