use std::process::Stdio;
use std::time::Duration;

use log::debug;
use serde::Serialize;
use tokio::process::Command;

use crate::errors::ScanError;
use crate::utils;

/// Captured result of one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// What tool adapters hand back instead of failing the scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolReport<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub findings: Vec<T>,
}

impl<T: Serialize> ToolReport<T> {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            output: None,
            findings: Vec::new(),
        }
    }
}

/// Resolves `name` the same way for every adapter: ./tools, cwd, then PATH.
pub fn locate(name: &str) -> Result<String, ScanError> {
    utils::get_binary_path(name).ok_or_else(|| ScanError::ToolUnavailable(format!("'{}' binary not found", name)))
}

/// Runs `program args...` to completion. The child is killed when `timeout`
/// elapses.
pub async fn run_tool(program: &str, args: &[String], timeout: Duration) -> Result<ToolOutput, ScanError> {
    debug!("running {} {}", program, args.join(" "));
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ScanError::ToolUnavailable(format!("failed to start {}: {}", program, e)))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => return Err(ScanError::Io(e)),
        Err(_) => {
            return Err(ScanError::ToolUnavailable(format!(
                "{} timed out after {}s",
                program,
                timeout.as_secs()
            )))
        }
    };

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_tool_unavailable() {
        let err = run_tool("/nonexistent/bin/tool-xyz", &[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ScanError::ToolUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let out = run_tool("sh", &["-c".to_string(), "echo hi; exit 3".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = run_tool("sh", &["-c".to_string(), "sleep 5".to_string()], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::ToolUnavailable(msg) if msg.contains("timed out")));
    }

    #[test]
    fn test_failed_report_shape() {
        let report: ToolReport<String> = ToolReport::failed("docker missing");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "docker missing");
        assert!(json.get("output").is_none());
    }
}
