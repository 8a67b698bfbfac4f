use std::fs;
use std::io::BufRead;
use std::path::Path;

use log::warn;

use crate::core::marker::Marker;

/// Placeholder replaced by the attempt's marker.
pub const MARK: &str = "{MARK}";

pub const XSS_TEMPLATES: &[&str] = &[
    "{MARK}",
    "<script>alert('{MARK}')</script>",
    r#""><img src=x onerror=alert('{MARK}')>"#,
    r#"'"><svg/onload=alert('{MARK}')>"#,
    "<body onload=alert('{MARK}')>",
    "javascript:alert('{MARK}')",
];

pub const SQLI_BASIC: &[&str] = &["'", "\"", " OR 1=1 -- "];

#[derive(Debug, Clone)]
pub struct PayloadLoader {
    pub xss_templates: Vec<String>,
    pub sqli_payloads: Vec<String>,
}

impl Default for PayloadLoader {
    fn default() -> Self {
        Self {
            xss_templates: XSS_TEMPLATES.iter().map(|s| s.to_string()).collect(),
            sqli_payloads: SQLI_BASIC.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PayloadLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in templates plus the `{MARK}` lines of `path`. Lines without
    /// the placeholder could never be traced back to an attempt and are
    /// dropped.
    pub fn with_xss_file(path: Option<&str>) -> Self {
        let mut loader = Self::new();
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return loader;
        };

        let mut skipped = 0;
        for line in load_list_from_file(path) {
            if !line.contains(MARK) {
                skipped += 1;
                continue;
            }
            if !loader.xss_templates.contains(&line) {
                loader.xss_templates.push(line);
            }
        }
        if skipped > 0 {
            warn!("Ignored {} payload line(s) without {} in {}", skipped, MARK, path);
        }
        loader
    }

    pub fn template_count(&self) -> usize {
        self.xss_templates.len()
    }
}

pub fn render(template: &str, marker: &Marker) -> String {
    template.replace(MARK, marker.as_str())
}

/// Loads lines from a file, skipping empty lines and comments
pub fn load_list_from_file(path: &str) -> Vec<String> {
    let path = Path::new(path);
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to open payload file {:?}: {}", path, e);
            return Vec::new();
        }
    };
    let reader = std::io::BufReader::new(file);
    reader
        .lines()
        .map_while(Result::ok)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .collect()
}
