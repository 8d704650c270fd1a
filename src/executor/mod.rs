//! Tool execution layer
//!
//! The executor is the opaque "mutate the workspace" capability: it applies
//! proposed actions, snapshots workspace state, and restores snapshots for
//! reverts. The git-backed implementation lives in `git`; `scripted` is the
//! deterministic double used by tests.

pub mod git;
pub mod scripted;

pub use git::GitExecutor;
pub use scripted::ScriptedExecutor;

use crate::provider::ProposedAction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable snapshot identifier of workspace state
///
/// A commit sha for the git executor; opaque elsewhere. Used only for
/// comparison and revert, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Placeholder for the rare case where taking a snapshot itself failed
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == "unknown"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Line counts for a change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    pub files_changed: u32,
    pub added: u64,
    pub removed: u64,
}

impl DiffStat {
    /// Deleted lines per added line; infinite for pure deletions
    pub fn deletion_ratio(&self) -> f64 {
        if self.added == 0 {
            if self.removed == 0 { 0.0 } else { f64::INFINITY }
        } else {
            self.removed as f64 / self.added as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files_changed == 0 && self.added == 0 && self.removed == 0
    }

    /// Parse `git diff --numstat` output
    pub fn from_numstat(numstat: &str) -> Self {
        let mut stat = DiffStat::default();
        for line in numstat.lines() {
            let mut fields = line.split('\t');
            let added = fields.next().unwrap_or("").trim();
            let removed = fields.next().unwrap_or("").trim();
            if fields.next().is_none() {
                continue;
            }
            stat.files_changed += 1;
            // Binary files report "-" for both counts
            stat.added += added.parse::<u64>().unwrap_or(0);
            stat.removed += removed.parse::<u64>().unwrap_or(0);
        }
        stat
    }

    /// Count +/- lines of a unified diff directly
    pub fn from_unified_diff(diff: &str) -> Self {
        let mut stat = DiffStat::default();
        for line in diff.lines() {
            if line.starts_with("+++ ") {
                stat.files_changed += 1;
            } else if line.starts_with('+') && !line.starts_with("+++") {
                stat.added += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                stat.removed += 1;
            }
        }
        stat
    }
}

/// What actually happened when an action was applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Unified diff of the workspace change the action produced
    pub diff: String,

    /// Line counts for `diff`
    pub diff_stat: DiffStat,

    /// Commands that were run, in order
    pub commands: Vec<String>,

    /// Exit code of the last command, if any ran
    pub exit_code: Option<i32>,

    pub stdout: String,
    pub stderr: String,
}

impl ActionOutcome {
    /// Outcome for an action that changed nothing
    pub fn no_op() -> Self {
        Self::default()
    }

    /// Outcome synthesized from a unified diff, for tests and doubles
    pub fn from_diff(diff: impl Into<String>) -> Self {
        let diff = diff.into();
        Self {
            diff_stat: DiffStat::from_unified_diff(&diff),
            diff,
            ..Default::default()
        }
    }

    /// Combined command output for the audit trail
    pub fn raw_output(&self) -> String {
        let mut out = String::new();
        if !self.stdout.trim().is_empty() {
            out.push_str(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.stderr.trim_end());
        }
        out
    }
}

/// Errors from the tool executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("git error: {0}")]
    Git(String),

    /// The workspace could not be restored to the checkpoint. Fatal: the
    /// session aborts and the workspace is reported inconsistent.
    #[error("revert to checkpoint {checkpoint} failed: {details}")]
    RevertFailed { checkpoint: String, details: String },
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::Io(_) => true,
            ExecutorError::Timeout { .. } => true,
            ExecutorError::Git(_) => false,
            ExecutorError::RevertFailed { .. } => false,
        }
    }

    pub fn is_revert_failure(&self) -> bool {
        matches!(self, ExecutorError::RevertFailed { .. })
    }
}

/// Workspace mutation capability
///
/// `restore` must be atomic from the caller's perspective: on Ok the
/// workspace matches the checkpoint exactly; anything else is
/// `RevertFailed`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Apply one proposed action and report what changed
    async fn apply(&self, action: &ProposedAction) -> Result<ActionOutcome, ExecutorError>;

    /// Snapshot current workspace state
    async fn checkpoint(&self) -> Result<CheckpointId, ExecutorError>;

    /// Restore a previously taken snapshot
    async fn restore(&self, checkpoint: &CheckpointId) -> Result<(), ExecutorError>;
}
