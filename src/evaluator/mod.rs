//! Criteria evaluation
//!
//! The evaluator runs the task's acceptance check against the workspace and
//! reports pass/fail plus diagnostics. It never mutates the workspace. A
//! check that cannot run at all is a distinct `Unavailable` condition, which
//! the control loop treats as transient, never as a failing result.

pub mod command;

pub use command::{CommandEvaluator, EvalConfig};

use crate::session::task::AcceptanceCriterion;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Result of one acceptance check run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    /// Whether the criterion was met
    pub passed: bool,

    /// Human-readable diagnostics assembled from the check's output
    pub diagnostics: String,

    /// Exit code of the check command, when it produced one
    pub exit_code: Option<i32>,

    /// Wall-clock duration of the check
    pub duration_ms: u64,
}

impl EvalResult {
    /// Passing result with no diagnostics
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostics: String::new(),
            exit_code: Some(0),
            duration_ms: 0,
        }
    }

    /// Passing result that keeps the check's output
    pub fn pass_with(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostics: diagnostics.into(),
            exit_code: Some(0),
            duration_ms: 0,
        }
    }

    /// Failing result
    pub fn fail(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostics: diagnostics.into(),
            exit_code: None,
            duration_ms: 0,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// First lines of the diagnostics, for feedback and log lines
    pub fn summary(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self.diagnostics.lines().take(max_lines).collect();
        lines.join("\n")
    }

    /// Count of non-empty diagnostic lines, used as a coarse failure signal
    /// when comparing two failing results
    pub fn noise(&self) -> usize {
        self.diagnostics.lines().filter(|l| !l.trim().is_empty()).count()
    }
}

/// Errors that keep the acceptance check from running at all
///
/// These are transient by definition: the check was not evaluated, so the
/// result is neither pass nor fail.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The check command itself could not be started
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),

    /// IO failure while running the check
    #[error("evaluator IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EvalError::Unavailable(_) => true,
            EvalError::Io(_) => true,
        }
    }
}

/// Runs the acceptance check against a workspace
///
/// Implementations must be idempotent and side-effect-free on the evaluated
/// workspace: two calls without an intervening mutation return the same
/// `passed` value.
#[async_trait]
pub trait CriteriaEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        criterion: &AcceptanceCriterion,
        workspace: &Path,
    ) -> Result<EvalResult, EvalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_result() {
        let result = EvalResult::pass();
        assert!(result.passed);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_fail_result() {
        let result = EvalResult::fail("2 tests failed").with_exit_code(1);
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.diagnostics, "2 tests failed");
    }

    #[test]
    fn test_summary_truncates() {
        let result = EvalResult::fail("line1\nline2\nline3\nline4");
        assert_eq!(result.summary(2), "line1\nline2");
        assert_eq!(result.summary(10), "line1\nline2\nline3\nline4");
    }

    #[test]
    fn test_noise_ignores_blank_lines() {
        let result = EvalResult::fail("error: a\n\n   \nerror: b\n");
        assert_eq!(result.noise(), 2);
        assert_eq!(EvalResult::pass().noise(), 0);
    }

    #[test]
    fn test_eval_errors_are_retryable() {
        assert!(EvalError::Unavailable("sh missing".to_string()).is_retryable());
        let io = EvalError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(io.is_retryable());
    }

    #[test]
    fn test_result_serialization_roundtrip() {
        let result = EvalResult::fail("diag").with_exit_code(2).with_duration_ms(15);
        let json = serde_json::to_string(&result).unwrap();
        let parsed: EvalResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }
}
