//! Test execution through a configured shell-style command.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::TestRunner;
use crate::config::TestsConfig;
use crate::state::TestResult;

/// Runs the project's test command and captures its output.
#[derive(Debug, Clone)]
pub(crate) struct CommandTestRunner {
    command: String,
    timeout: Duration,
    max_output_bytes: usize,
}

impl CommandTestRunner {
    pub fn new(config: &TestsConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    async fn execute(&self, repo: &Path) -> Result<TestResult, String> {
        // Parse command using shell-words to handle quoted arguments properly
        // e.g., `sh -c "npm run lint && npm test"` becomes ["sh", "-c", "npm run lint && npm test"]
        let parts = shell_words::split(&self.command)
            .map_err(|e| format!("Failed to parse test command: {e}"))?;

        let (program, args) = parts
            .split_first()
            .ok_or_else(|| "Test command cannot be empty".to_string())?;

        let child = tokio::process::Command::new(program)
            .current_dir(repo)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|e| format!("Failed to run test command: {e}"))?,
            Err(_) => {
                return Ok(TestResult::failed(format!(
                    "Test command timed out after {} seconds ({})",
                    self.timeout.as_secs(),
                    self.command
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (false, false) => format!("{stdout}\n{stderr}"),
            (false, true) => stdout.into_owned(),
            (true, _) => stderr.into_owned(),
        };
        let combined = truncate_tail(&combined, self.max_output_bytes);

        if output.status.success() {
            Ok(TestResult::passed(combined))
        } else {
            let status = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Ok(TestResult::failed(format!(
                "Tests failed ({}, exit {status}):\n{combined}",
                self.command
            )))
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    fn describe(&self) -> String {
        self.command.clone()
    }

    async fn run(&self, repo: &Path) -> TestResult {
        debug!("Running tests with command: {}", self.command);

        match self.execute(repo).await {
            Ok(result) => {
                if result.passed {
                    info!("Tests passed: {}", self.command);
                } else {
                    info!("Tests failed: {}", self.command);
                }
                result
            }
            Err(message) => {
                warn!("Test command could not run: {}", message);
                TestResult::failed(message)
            }
        }
    }
}

/// Keeps the last `max_bytes` bytes of `text`, cut at a char boundary.
fn truncate_tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... output truncated ...]\n{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(command: &str, timeout_secs: u64) -> CommandTestRunner {
        CommandTestRunner::new(&TestsConfig {
            command: command.to_string(),
            timeout_secs,
            max_output_bytes: 1024,
        })
    }

    #[tokio::test]
    async fn test_passing_command() {
        let cwd = std::env::current_dir().unwrap();
        let result = runner("sh -c \"echo all good\"", 10).run(&cwd).await;
        assert!(result.passed);
        assert!(result.output.contains("all good"));
    }

    #[tokio::test]
    async fn test_failing_command_captures_output() {
        let cwd = std::env::current_dir().unwrap();
        let result = runner("sh -c \"echo 1 failing >&2; exit 3\"", 10)
            .run(&cwd)
            .await;
        assert!(!result.passed);
        assert!(result.output.contains("1 failing"));
        assert!(result.output.contains("exit 3"));
    }

    #[tokio::test]
    async fn test_missing_program_is_failed_result() {
        let cwd = std::env::current_dir().unwrap();
        let result = runner("definitely-not-a-real-test-binary-9f8e7d", 10)
            .run(&cwd)
            .await;
        assert!(!result.passed);
        assert!(result.output.contains("Failed to run test command"));
    }

    #[tokio::test]
    async fn test_timeout_is_failed_result() {
        let cwd = std::env::current_dir().unwrap();
        let result = runner("sleep 5", 1).run(&cwd).await;
        assert!(!result.passed);
        assert!(result.output.contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn test_unparseable_command_is_failed_result() {
        let cwd = std::env::current_dir().unwrap();
        let result = runner("sh -c \"unterminated", 10).run(&cwd).await;
        assert!(!result.passed);
        assert!(result.output.contains("Failed to parse test command"));
    }

    #[test]
    fn test_describe() {
        assert_eq!(runner("cargo test", 1).describe(), "cargo test");
    }

    #[test]
    fn test_truncate_tail_short_text_unchanged() {
        assert_eq!(truncate_tail("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_tail_keeps_end() {
        let truncated = truncate_tail("0123456789", 4);
        assert!(truncated.ends_with("6789"));
        assert!(truncated.starts_with("[... output truncated ...]"));
    }

    #[test]
    fn test_truncate_tail_char_boundary() {
        // 'é' is two bytes; cutting inside it must move forward
        let truncated = truncate_tail("aéé", 3);
        assert!(truncated.ends_with('é'));
    }
}
