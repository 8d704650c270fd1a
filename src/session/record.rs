//! Iteration audit records
//!
//! One ActionRecord exists per completed iteration. The sequence of records
//! is the full audit trail of a session: what was attempted, what the
//! acceptance check said, and what the reviewer decided.

use crate::evaluator::EvalResult;
use crate::executor::{ActionOutcome, CheckpointId, DiffStat};
use serde::{Deserialize, Serialize};

/// Reviewer decision on one iteration's change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Keep the change
    Accept,
    /// Restore the pre-action checkpoint
    Revert,
    /// Keep the change but feed a diagnostic summary into the next iteration
    RetryWithFeedback(String),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, Verdict::Revert)
    }

    /// Feedback carried to the next iteration, if any
    pub fn feedback(&self) -> Option<&str> {
        match self {
            Verdict::RetryWithFeedback(text) => Some(text),
            _ => None,
        }
    }

    /// Short label for reports and the session index
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Accept => "accept",
            Verdict::Revert => "revert",
            Verdict::RetryWithFeedback(_) => "retry",
        }
    }
}

/// Audit entry for one iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Iteration index, 1-based
    pub iteration: u32,

    /// What the agent said it was doing
    pub description: String,

    /// Unified diff of what actually changed in the workspace
    pub diff: String,

    /// Shell commands the action ran
    pub commands: Vec<String>,

    /// Line counts for the diff
    pub diff_stat: DiffStat,

    /// Workspace snapshot taken before the action
    pub checkpoint_before: CheckpointId,

    /// Workspace snapshot after the verdict was applied. Equals
    /// `checkpoint_before` when the verdict was Revert or the iteration
    /// was a no-op.
    pub checkpoint_after: CheckpointId,

    /// Acceptance check result. None when the iteration degraded before the
    /// check could run.
    pub eval: Option<EvalResult>,

    /// Reviewer decision
    pub verdict: Verdict,

    /// True when transient retries were exhausted and the iteration became a
    /// no-op with feedback
    pub degraded: bool,

    /// True when cancellation interrupted the iteration
    pub incomplete: bool,

    /// Hash of normalized failure diagnostics, used to detect repeated
    /// identical failures. None for passing iterations.
    pub failure_signature: Option<String>,

    /// Epoch milliseconds when the record was appended
    pub recorded_at: i64,
}

impl ActionRecord {
    /// Record for an iteration that ran to completion
    ///
    /// `eval` is None when the acceptance check could not run; the change is
    /// still kept. The verdict defaults to Accept; the control loop assigns
    /// the reviewer's verdict before appending the record.
    pub fn completed(
        iteration: u32,
        description: impl Into<String>,
        outcome: &ActionOutcome,
        checkpoint_before: CheckpointId,
        checkpoint_after: CheckpointId,
        eval: Option<EvalResult>,
    ) -> Self {
        Self {
            iteration,
            description: description.into(),
            diff: outcome.diff.clone(),
            commands: outcome.commands.clone(),
            diff_stat: outcome.diff_stat.clone(),
            checkpoint_before,
            checkpoint_after,
            eval,
            verdict: Verdict::Accept,
            degraded: false,
            incomplete: false,
            failure_signature: None,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Record for an iteration that exhausted its transient retries
    ///
    /// The workspace was not changed; the reason becomes feedback for the
    /// next iteration.
    pub fn degraded(iteration: u32, checkpoint: CheckpointId, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            iteration,
            description: "no-op: transient retries exhausted".to_string(),
            diff: String::new(),
            commands: Vec::new(),
            diff_stat: DiffStat::default(),
            checkpoint_before: checkpoint.clone(),
            checkpoint_after: checkpoint,
            eval: None,
            verdict: Verdict::RetryWithFeedback(reason),
            degraded: true,
            incomplete: false,
            failure_signature: None,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Record for an iteration interrupted by cancellation
    pub fn interrupted(
        iteration: u32,
        checkpoint_before: CheckpointId,
        checkpoint_after: Option<CheckpointId>,
        note: impl Into<String>,
    ) -> Self {
        let note = note.into();
        Self {
            iteration,
            description: "interrupted by cancellation".to_string(),
            diff: String::new(),
            commands: Vec::new(),
            diff_stat: DiffStat::default(),
            checkpoint_after: checkpoint_after.unwrap_or_else(|| checkpoint_before.clone()),
            checkpoint_before,
            eval: None,
            verdict: Verdict::RetryWithFeedback(note),
            degraded: false,
            incomplete: true,
            failure_signature: None,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether the acceptance check passed on this iteration
    pub fn passed(&self) -> bool {
        self.eval.as_ref().map(|e| e.passed).unwrap_or(false)
    }

    /// Whether the iteration changed nothing in the workspace
    pub fn is_noop(&self) -> bool {
        self.diff_stat.is_empty() && self.commands.is_empty()
    }

    /// Diagnostics text for failed or degraded iterations
    pub fn failure_text(&self) -> Option<&str> {
        match &self.eval {
            Some(eval) if !eval.passed => Some(&eval.diagnostics),
            Some(_) => None,
            None => self.verdict.feedback(),
        }
    }
}
