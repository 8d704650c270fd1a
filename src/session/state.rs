//! Live session state
//!
//! SessionState is mutated only by the control loop. The history is
//! append-only, the iteration counter strictly increases, and a terminal
//! status can never be overwritten; `record` and `finish` enforce all three.

use crate::error::{HoneError, Result};
use crate::evaluator::EvalResult;
use crate::id::generate_session_id;
use crate::session::outcome::SessionOutcome;
use crate::session::record::ActionRecord;
use crate::session::task::Task;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Actively iterating
    Running,
    /// Acceptance check passed
    Succeeded,
    /// Iteration budget exhausted
    Failed,
    /// Fatal condition or cancellation
    Aborted,
}

impl SessionStatus {
    /// Returns true once the session has ended
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "succeeded" => Ok(SessionStatus::Succeeded),
            "failed" => Ok(SessionStatus::Failed),
            "aborted" => Ok(SessionStatus::Aborted),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// The mutable record of one task run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Unique session identifier
    pub id: String,

    /// The immutable task being worked
    pub task: Task,

    /// One record per completed iteration, in iteration order
    pub history: Vec<ActionRecord>,

    /// Completed iteration count
    pub iteration: u32,

    /// Current status
    pub status: SessionStatus,

    /// Reviewer feedback carried into the next iteration
    pub feedback: Option<String>,

    /// Most recent acceptance check result, including the pre-flight check
    pub last_eval: Option<EvalResult>,

    pub started_at: i64,
    pub updated_at: i64,
}

impl SessionState {
    /// Start a new session over a validated task
    pub fn new(task: Task) -> Result<Self> {
        task.validate()?;
        let now = chrono::Utc::now().timestamp_millis();
        Ok(Self {
            id: generate_session_id(),
            task,
            history: Vec::new(),
            iteration: 0,
            status: SessionStatus::Running,
            feedback: None,
            last_eval: None,
            started_at: now,
            updated_at: now,
        })
    }

    /// Append one iteration's record
    ///
    /// Rejects records once the session is terminal and records whose
    /// iteration index is not exactly the next one.
    pub fn record(&mut self, record: ActionRecord) -> Result<()> {
        if self.status.is_terminal() {
            return Err(HoneError::InvalidState(format!(
                "cannot record iteration {} on {} session {}",
                record.iteration, self.status, self.id
            )));
        }
        if record.iteration != self.iteration + 1 {
            return Err(HoneError::InvalidState(format!(
                "iteration {} recorded out of order, expected {}",
                record.iteration,
                self.iteration + 1
            )));
        }
        if let Some(eval) = &record.eval {
            self.last_eval = Some(eval.clone());
        }
        self.iteration = record.iteration;
        self.history.push(record);
        self.touch();
        Ok(())
    }

    /// Move the session into a terminal status
    ///
    /// A terminal status is final; calling this twice is an error.
    pub fn finish(&mut self, status: SessionStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(HoneError::InvalidState(
                "finish requires a terminal status".to_string(),
            ));
        }
        if self.status.is_terminal() {
            return Err(HoneError::InvalidState(format!(
                "session {} already ended as {}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.touch();
        Ok(())
    }

    /// Iterations left in the budget
    pub fn budget_remaining(&self) -> u32 {
        self.task.max_iterations.saturating_sub(self.iteration)
    }

    /// True once the iteration budget is used up
    pub fn budget_exhausted(&self) -> bool {
        self.iteration >= self.task.max_iterations
    }

    /// Consume the state into the outcome returned to the caller
    pub fn into_outcome(self, final_diagnostics: String) -> SessionOutcome {
        SessionOutcome {
            session_id: self.id,
            status: self.status,
            iterations_used: self.iteration,
            history: self.history,
            final_diagnostics,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
