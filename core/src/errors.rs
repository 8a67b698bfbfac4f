use thiserror::Error;

/// Scan-level error taxonomy.
///
/// Only `Configuration` is ever surfaced as a hard failure of a scan; the
/// other variants describe per-item failures that are logged and skipped.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("network failure for '{url}': {reason}")]
    Network { url: String, reason: String },

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    pub fn config(msg: impl Into<String>) -> Self {
        ScanError::Configuration(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ScanError::Configuration(_))
    }
}
