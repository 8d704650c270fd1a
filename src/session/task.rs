//! Task and acceptance criterion types
//!
//! A Task is the immutable input to a session: the natural-language goal,
//! the executable acceptance check, the iteration budget, and the workspace
//! the agent is allowed to mutate.

use crate::error::{HoneError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default iteration budget when the caller does not specify one
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// An objective, executable check that decides whether the goal has been met
///
/// The command runs via `sh -c` in the task workspace; the criterion is met
/// when the exit code matches `expected_exit_code` (0 unless overridden).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    /// Shell command to run
    pub command: String,

    /// Exit code that counts as passing
    pub expected_exit_code: i32,
}

impl AcceptanceCriterion {
    /// Create a criterion that passes on exit code 0
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expected_exit_code: 0,
        }
    }

    /// Override the passing exit code
    pub fn with_expected_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = code;
        self
    }

    /// Whether an observed exit code satisfies this criterion
    pub fn is_met_by(&self, exit_code: i32) -> bool {
        exit_code == self.expected_exit_code
    }
}

/// The immutable input to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Natural-language goal the agent works toward
    pub goal: String,

    /// Acceptance check that decides success
    pub criterion: AcceptanceCriterion,

    /// Maximum iterations before the session fails
    pub max_iterations: u32,

    /// Directory the agent operates in
    pub workspace_path: PathBuf,
}

impl Task {
    /// Create a task with the default iteration budget
    pub fn new(
        goal: impl Into<String>,
        acceptance_command: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            goal: goal.into(),
            criterion: AcceptanceCriterion::new(acceptance_command),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            workspace_path: workspace_path.into(),
        }
    }

    /// Override the iteration budget
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Check the task is runnable before a session starts
    pub fn validate(&self) -> Result<()> {
        if self.goal.trim().is_empty() {
            return Err(HoneError::InvalidTask("goal is empty".to_string()));
        }
        if self.criterion.command.trim().is_empty() {
            return Err(HoneError::InvalidTask(
                "acceptance command is empty".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(HoneError::InvalidTask(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
