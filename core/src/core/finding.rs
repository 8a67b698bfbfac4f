use serde::Serialize;

use crate::core::comparator::{Classification, Evidence, Verdict};
use crate::core::marker::Marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Xss,
    Sqli,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Xss => write!(f, "XSS"),
            ProbeKind::Sqli => write!(f, "SQLi"),
        }
    }
}

/// Outcome of one (parameter, payload) probe. Never mutated after it is
/// emitted, apart from the DOM confirmation flag set before emission.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeFinding {
    pub kind: ProbeKind,
    pub url: String,
    pub method: String,
    pub params: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
    pub classification: Classification,
    pub evidence: Evidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_executed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl ProbeFinding {
    pub fn from_verdict(
        kind: ProbeKind,
        url: impl Into<String>,
        method: &str,
        params: Vec<String>,
        payload: Option<String>,
        marker: Option<Marker>,
        verdict: Verdict,
    ) -> Self {
        Self {
            kind,
            url: url.into(),
            method: method.to_uppercase(),
            params,
            payload,
            marker,
            classification: verdict.classification,
            evidence: verdict.evidence,
            similarity: verdict.similarity,
            status: verdict.status,
            dom_executed: None,
            error: verdict.error,
            attempts: verdict.attempts,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.classification.is_hit()
    }

    /// One-line summary used in console output.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "{} {} {} [{}] -> {}",
            self.kind,
            self.method,
            self.url,
            self.params.join(","),
            self.classification
        );
        if let Some(sim) = self.similarity {
            text.push_str(&format!(" (similarity {:.3})", sim));
        }
        if let Some(status) = self.status {
            text.push_str(&format!(" status {}", status));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_without_empty_optionals() {
        let verdict = Verdict {
            classification: Classification::Suspected,
            evidence: Evidence::Length,
            similarity: None,
            status: Some(200),
            error: None,
            attempts: 1,
        };
        let finding = ProbeFinding::from_verdict(
            ProbeKind::Sqli,
            "http://t/item?id=5'",
            "get",
            vec!["id".into()],
            Some("'".into()),
            None,
            verdict,
        );
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "sqli");
        assert_eq!(json["method"], "GET");
        assert_eq!(json["classification"], "suspected");
        assert_eq!(json["evidence"], "length");
        assert!(json.get("similarity").is_none());
        assert!(json.get("dom_executed").is_none());
        assert!(finding.is_hit());
    }
}
