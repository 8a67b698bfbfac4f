use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::modules::runner::run_tool;

pub const DEFAULT_DOM_WAIT: Duration = Duration::from_secs(2);

/// Confirms that a reflected payload actually executes in a browser.
///
/// `None` means confirmation was not attempted.
#[async_trait]
pub trait DomConfirmer: Send + Sync {
    async fn confirm(&self, url: &str, wait: Duration) -> Option<bool>;
}

pub struct DisabledConfirmer;

#[async_trait]
impl DomConfirmer for DisabledConfirmer {
    async fn confirm(&self, _url: &str, _wait: Duration) -> Option<bool> {
        None
    }
}

/// Drives an external headless-browser harness: `<command...> <url> <wait_ms>`.
/// Exit status 0 with `dialog` on stdout means a dialog fired.
pub struct CommandConfirmer {
    program: String,
    args: Vec<String>,
    grace: Duration,
}

impl CommandConfirmer {
    /// `command` is split on whitespace; the first word is the program.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
            grace: Duration::from_secs(15),
        })
    }
}

#[async_trait]
impl DomConfirmer for CommandConfirmer {
    async fn confirm(&self, url: &str, wait: Duration) -> Option<bool> {
        let mut args = self.args.clone();
        args.push(url.to_string());
        args.push(wait.as_millis().to_string());

        let fired = match run_tool(&self.program, &args, wait + self.grace).await {
            Ok(out) => out.success && out.stdout.to_lowercase().contains("dialog"),
            Err(e) => {
                debug!("dom confirmation failed for {}: {}", url, e);
                false
            }
        };
        Some(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_reports_not_attempted() {
        assert_eq!(DisabledConfirmer.confirm("http://t/", DEFAULT_DOM_WAIT).await, None);
    }

    #[test]
    fn test_parse_command() {
        assert!(CommandConfirmer::parse("   ").is_none());
        let c = CommandConfirmer::parse("node harness.js --headless").unwrap();
        assert_eq!(c.program, "node");
        assert_eq!(c.args, vec!["harness.js", "--headless"]);
    }

    #[tokio::test]
    async fn test_missing_harness_counts_as_not_fired() {
        let c = CommandConfirmer::parse("/nonexistent/harness").unwrap();
        assert_eq!(c.confirm("http://t/", Duration::from_millis(10)).await, Some(false));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dialog_on_stdout_counts_as_fired() {
        use std::io::Write;
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "echo \"dialog opened on $1 after $2ms\"").unwrap();
        let c = CommandConfirmer::parse(&format!("sh {}", script.path().display())).unwrap();
        assert_eq!(c.confirm("http://t/", Duration::from_millis(10)).await, Some(true));

        let mut quiet = tempfile::NamedTempFile::new().unwrap();
        writeln!(quiet, "echo nothing").unwrap();
        let c = CommandConfirmer::parse(&format!("sh {}", quiet.path().display())).unwrap();
        assert_eq!(c.confirm("http://t/", Duration::from_millis(10)).await, Some(false));
    }
}
