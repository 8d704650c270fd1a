//! Shell command evaluator
//!
//! Runs the acceptance check via `sh -c` in the task workspace with a
//! timeout. Spawn failures surface as `EvalError::Unavailable`; a timeout is
//! a failing result, because the check ran and did not succeed in time.

use crate::evaluator::{CriteriaEvaluator, EvalError, EvalResult};
use crate::session::task::AcceptanceCriterion;
use async_trait::async_trait;
use log::debug;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Configuration for the command evaluator
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Timeout in milliseconds (default: 120000)
    pub timeout_ms: u64,
    /// Environment variables to set for the check
    pub env: Vec<(String, String)>,
    /// Cap on captured output kept in diagnostics, per stream
    pub max_output_bytes: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            env: Vec::new(),
            max_output_bytes: 16_384,
        }
    }
}

impl EvalConfig {
    /// Set the timeout in milliseconds
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Evaluator that shells out to the acceptance command
pub struct CommandEvaluator {
    config: EvalConfig,
}

impl CommandEvaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    async fn execute(
        &self,
        criterion: &AcceptanceCriterion,
        workspace: &Path,
    ) -> Result<std::process::Output, EvalError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&criterion.command);
        cmd.current_dir(workspace);

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| EvalError::Unavailable(format!("cannot run '{}': {}", criterion.command, e)))?;

        let timeout = tokio::time::Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EvalError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("check timed out after {}ms", self.config.timeout_ms),
            ))),
        }
    }

    fn diagnostics_from(&self, exit_code: Option<i32>, stdout: &str, stderr: &str) -> String {
        let mut parts = Vec::new();
        parts.push(match exit_code {
            Some(code) => format!("exit code: {}", code),
            None => "terminated by signal".to_string(),
        });
        if !stdout.trim().is_empty() {
            parts.push(format!("stdout:\n{}", tail(stdout, self.config.max_output_bytes)));
        }
        if !stderr.trim().is_empty() {
            parts.push(format!("stderr:\n{}", tail(stderr, self.config.max_output_bytes)));
        }
        parts.join("\n")
    }
}

/// Keep the last `max_bytes` of output; failures usually report at the end
fn tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.trim_end().to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("... ({} bytes trimmed)\n{}", start, text[start..].trim_end())
}

#[async_trait]
impl CriteriaEvaluator for CommandEvaluator {
    async fn evaluate(
        &self,
        criterion: &AcceptanceCriterion,
        workspace: &Path,
    ) -> Result<EvalResult, EvalError> {
        let started = Instant::now();
        debug!("evaluating '{}' in {}", criterion.command, workspace.display());

        match self.execute(criterion, workspace).await {
            Ok(output) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code();
                let passed = exit_code.map(|c| criterion.is_met_by(c)).unwrap_or(false);

                let result = if passed {
                    EvalResult::pass_with(tail(&stdout, self.config.max_output_bytes))
                } else {
                    EvalResult::fail(self.diagnostics_from(exit_code, &stdout, &stderr))
                };
                let mut result = result.with_duration_ms(duration_ms);
                result.exit_code = exit_code;
                Ok(result)
            }
            Err(EvalError::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                let duration_ms = started.elapsed().as_millis() as u64;
                Ok(EvalResult::fail(format!(
                    "acceptance check timed out after {}ms",
                    self.config.timeout_ms
                ))
                .with_duration_ms(duration_ms))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    #[test]
    fn test_config_defaults() {
        let config = EvalConfig::default();
        assert_eq!(config.timeout_ms, 120_000);
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = EvalConfig::default().timeout_ms(5000).env("CI", "1");
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.env[0], ("CI".to_string(), "1".to_string()));
    }

    #[test]
    fn test_tail_keeps_short_output() {
        assert_eq!(tail("hello\n", 100), "hello");
    }

    #[test]
    fn test_tail_trims_long_output() {
        let long = "x".repeat(200);
        let trimmed = tail(&long, 50);
        assert!(trimmed.contains("bytes trimmed"));
        assert!(trimmed.ends_with(&"x".repeat(50)));
    }

    #[tokio::test]
    async fn test_evaluate_passing_command() {
        let dir = workspace();
        let evaluator = CommandEvaluator::new(EvalConfig::default());
        let criterion = AcceptanceCriterion::new("true");

        let result = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_evaluate_failing_command() {
        let dir = workspace();
        let evaluator = CommandEvaluator::new(EvalConfig::default());
        let criterion = AcceptanceCriterion::new("echo broken >&2 && exit 3");

        let result = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.diagnostics.contains("exit code: 3"));
        assert!(result.diagnostics.contains("broken"));
    }

    #[tokio::test]
    async fn test_evaluate_custom_expected_exit_code() {
        let dir = workspace();
        let evaluator = CommandEvaluator::new(EvalConfig::default());
        let criterion = AcceptanceCriterion::new("exit 1").with_expected_exit_code(1);

        let result = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_evaluate_timeout_is_a_failing_result() {
        let dir = workspace();
        let evaluator = CommandEvaluator::new(EvalConfig::default().timeout_ms(100));
        let criterion = AcceptanceCriterion::new("sleep 10");

        let result = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        assert!(!result.passed);
        assert!(result.diagnostics.contains("timed out"));
    }

    #[tokio::test]
    async fn test_evaluate_runs_in_workspace() {
        let dir = workspace();
        std::fs::write(dir.path().join("marker.txt"), "present").unwrap();
        let evaluator = CommandEvaluator::new(EvalConfig::default());
        let criterion = AcceptanceCriterion::new("test -f marker.txt");

        let result = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_evaluate_env_passed_through() {
        let dir = workspace();
        let evaluator = CommandEvaluator::new(EvalConfig::default().env("MY_VAR", "hello"));
        let criterion = AcceptanceCriterion::new("test \"$MY_VAR\" = \"hello\"");

        let result = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_evaluate_is_idempotent_without_mutation() {
        let dir = workspace();
        let evaluator = CommandEvaluator::new(EvalConfig::default());
        let criterion = AcceptanceCriterion::new("test -f marker.txt");

        let first = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        let second = evaluator.evaluate(&criterion, dir.path()).await.unwrap();
        assert_eq!(first.passed, second.passed);
    }

    #[tokio::test]
    async fn test_evaluate_missing_workspace_is_unavailable() {
        let evaluator = CommandEvaluator::new(EvalConfig::default());
        let criterion = AcceptanceCriterion::new("true");

        let result = evaluator
            .evaluate(&criterion, Path::new("/nonexistent/workspace/xyz"))
            .await;
        assert!(matches!(result, Err(EvalError::Unavailable(_))));
    }
}
