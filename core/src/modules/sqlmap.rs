use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::core::form::{dedup_forms, Form};
use crate::core::mutator::form_body;
use crate::errors::ScanError;
use crate::http::BodyType;
use crate::modules::runner::{locate, run_tool, ToolReport};

pub const DEFAULT_SQLMAP_IMAGE: &str = "spsproject-sqlmap:latest";
pub const DEFAULT_SQLMAP_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_SQLMAP_ARGS: &[&str] = &["--batch", "--random-agent", "--level=3", "--risk=2", "--threads=5"];

const ALLOWED_FLAGS: &[&str] = &["--random-agent", "--batch"];
const ALLOWED_PREFIXES: &[&str] = &["--level=", "--risk=", "--threads=", "--crawl=", "--tamper="];
const MAX_ARG_LEN: usize = 120;
const MAX_ARGS: usize = 20;

const CONFIRMED_PHRASES: &[&str] = &[
    "is vulnerable",
    "is injectable",
    "sql injection vulnerability",
    "identified the following injection point",
    "back-end dbms",
    "parameter",
    "payload:",
    "type: boolean-based blind",
    "type: error-based",
    "type: time-based",
];

const NOISE_PHRASES: &[&str] = &[
    "testing",
    "trying",
    "could not",
    "connection",
    "resuming",
    "parameter(s) not found",
    "all tested parameters",
    "fetched data logged",
    "starting",
    "ending",
    "check",
    "info",
    "enumerating",
    "payload value used",
    "http error",
    "unknown",
    "possible",
];

/// One confirmed line from sqlmap output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlmapFinding {
    pub level: String,
    /// Text before the first `.` of `detail`.
    pub message: String,
    pub detail: String,
    pub line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Accepts only a small allow-list of sqlmap switches.
pub fn sanitize_args(args: &[String]) -> Result<Vec<String>, ScanError> {
    if args.len() > MAX_ARGS {
        return Err(ScanError::config(format!("too many sqlmap args ({} > {})", args.len(), MAX_ARGS)));
    }
    args.iter()
        .map(|raw| {
            let arg = raw.trim();
            if arg.len() > MAX_ARG_LEN {
                return Err(ScanError::config(format!("sqlmap arg longer than {} chars", MAX_ARG_LEN)));
            }
            let allowed = ALLOWED_FLAGS.contains(&arg)
                || ALLOWED_PREFIXES.iter().any(|p| arg.starts_with(p) && arg.len() > p.len());
            if !allowed {
                return Err(ScanError::config(format!("sqlmap arg not allowed: {}", arg)));
            }
            Ok(arg.to_string())
        })
        .collect()
}

/// Points loopback targets at the container host; the port is kept.
pub fn rewrite_localhost(target: &str) -> String {
    let Ok(mut url) = Url::parse(target) else {
        return target.to_string();
    };
    match url.host_str() {
        Some("localhost") | Some("127.0.0.1") => {
            if url.set_host(Some("host.docker.internal")).is_err() {
                return target.to_string();
            }
            url.to_string()
        }
        _ => target.to_string(),
    }
}

/// `--data` (and the JSON content type header) for a POST form.
pub fn form_data_args(form: &Form) -> Vec<String> {
    let (body, body_type) = form_body(form, "test");
    let mut args = vec!["--data".to_string(), body];
    if body_type == BodyType::Json {
        args.push("--headers".to_string());
        args.push("Content-Type: application/json".to_string());
    }
    args
}

/// `-u <url>`, then the sanitized extra args (or the defaults), then the
/// first POST form's data.
pub fn build_args(target: &str, extra: &[String], forms: &[Form]) -> Result<Vec<String>, ScanError> {
    let mut args = vec!["-u".to_string(), rewrite_localhost(target)];
    if extra.is_empty() {
        args.extend(DEFAULT_SQLMAP_ARGS.iter().map(|s| s.to_string()));
    } else {
        args.extend(sanitize_args(extra)?);
    }
    if let Some(form) = dedup_forms(forms.to_vec()).iter().find(|f| f.is_post()) {
        args.extend(form_data_args(form));
    }
    Ok(args)
}

fn line_pattern() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r"^(?:\[\d{2}:\d{2}:\d{2}\]\s*)?\[(?P<level>[A-Z]+)\]\s*(?P<msg>.*)$")
            .expect("sqlmap line pattern must compile")
    })
}

/// Keeps lines that report an actual injection or a CRITICAL/ERROR, one per
/// (level, message).
pub fn parse_output(raw: &str) -> Vec<SqlmapFinding> {
    let mut findings = Vec::new();
    let mut seen = HashSet::new();

    for raw_line in raw.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let (level, msg) = match line_pattern().captures(line) {
            Some(caps) => (caps["level"].to_string(), caps["msg"].trim().to_string()),
            None => ("OTHER".to_string(), line.to_string()),
        };

        let low = msg.to_lowercase();
        if NOISE_PHRASES.iter().any(|k| low.contains(k)) {
            continue;
        }
        let confirmed = CONFIRMED_PHRASES.iter().any(|k| low.contains(k));
        if !confirmed && level != "CRITICAL" && level != "ERROR" {
            continue;
        }
        if !seen.insert((level.clone(), msg.clone())) {
            continue;
        }

        let message = msg.split('.').next().unwrap_or("").trim().to_string();
        findings.push(SqlmapFinding {
            level,
            message,
            detail: msg,
            line: line.to_string(),
            url: None,
        });
    }
    findings
}

/// Runs sqlmap inside a throwaway container.
pub struct SqlmapRunner {
    runtime: String,
    image: String,
    timeout: Duration,
}

impl SqlmapRunner {
    pub fn new(image: &str) -> Self {
        let image = image.trim().trim_start_matches('/');
        Self {
            runtime: "docker".to_string(),
            image: if image.is_empty() { DEFAULT_SQLMAP_IMAGE.to_string() } else { image.to_string() },
            timeout: DEFAULT_SQLMAP_TIMEOUT,
        }
    }

    pub fn with_runtime(mut self, runtime: &str) -> Self {
        self.runtime = runtime.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Only a rejected argument list is an `Err`; every runtime problem is
    /// reported through `ToolReport`.
    pub async fn run(&self, target: &str, extra: &[String], forms: &[Form]) -> Result<ToolReport<SqlmapFinding>, ScanError> {
        let sqlmap_args = build_args(target, extra, forms)?;

        let runtime = match locate(&self.runtime) {
            Ok(path) => path,
            Err(e) => return Ok(ToolReport::failed(e.to_string())),
        };

        let mut args = vec!["run".to_string(), "--rm".to_string(), self.image.clone()];
        args.extend(sqlmap_args);
        info!("sqlmap: {} {}", runtime, args.join(" "));

        let out = match run_tool(&runtime, &args, self.timeout).await {
            Ok(out) => out,
            Err(e) => {
                warn!("sqlmap failed on {}: {}", target, e);
                return Ok(ToolReport::failed(e.to_string()));
            }
        };

        let combined = if out.stderr.is_empty() {
            out.stdout
        } else {
            format!("{}\n{}", out.stdout, out.stderr)
        };

        if !out.success {
            let code = out.code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
            return Ok(ToolReport {
                ok: false,
                error: Some(format!("container error exit {}", code)),
                output: Some(combined),
                findings: Vec::new(),
            });
        }

        let findings = parse_output(&combined)
            .into_iter()
            .map(|mut f| {
                f.url = Some(target.to_string());
                f
            })
            .collect();
        Ok(ToolReport {
            ok: true,
            error: None,
            output: Some(combined),
            findings,
        })
    }
}
