use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::core::result_aggregator::ReportParts;
use crate::errors::ScanError;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub target: String,
    pub generated: String,
    pub results: ReportParts,
}

impl ScanReport {
    pub fn new(target: &str, results: ReportParts) -> Self {
        Self::generated_at(target, results, Utc::now())
    }

    pub fn generated_at(target: &str, results: ReportParts, now: DateTime<Utc>) -> Self {
        Self {
            target: target.to_string(),
            generated: timestamp(now),
            results,
        }
    }

    pub fn file_name(&self) -> String {
        report_file_name(&self.target, &self.generated)
    }

    /// Writes the pretty-printed report into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ScanError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        info!("report written to {}", path.display());
        Ok(path)
    }
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// `report_<target with "://" and "/" as "_">_<generated>.json`
pub fn report_file_name(target: &str, generated: &str) -> String {
    format!("report_{}_{}.json", target.replace("://", "_").replace('/', "_"), generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(timestamp(t), "20240309T070501Z");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            report_file_name("https://shop.test/a/b", "20240309T070501Z"),
            "report_https_shop.test_a_b_20240309T070501Z.json"
        );
    }

    #[test]
    fn test_write_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("reports");
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let report = ScanReport::generated_at("http://t/", ReportParts::default(), t);

        let path = report.write_to(&dir).unwrap();
        assert_eq!(path.file_name().unwrap(), "report_http_t__20240102T030405Z.json");

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["target"], "http://t/");
        assert_eq!(value["generated"], "20240102T030405Z");
        for key in ["ports", "crawl", "headers", "xss", "sqli", "sqlmap"] {
            assert!(value["results"].get(key).is_some(), "missing {}", key);
        }
    }
}
