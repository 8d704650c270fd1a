//! Deterministic executor for tests.
//!
//! Plays back a queue of pre-baked outcomes instead of touching a real
//! workspace, and records every apply/restore so assertions can inspect
//! what the control loop asked for.

use super::{ActionOutcome, CheckpointId, ExecutorError, ToolExecutor};
use crate::provider::ProposedAction;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Scripted [`ToolExecutor`] with synthetic checkpoints.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<Result<ActionOutcome, ExecutorError>>>,
    repeat: Mutex<Option<ActionOutcome>>,
    counter: AtomicU32,
    fail_restores: AtomicBool,
    restores: Mutex<Vec<CheckpointId>>,
    applied: Mutex<Vec<ProposedAction>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one outcome for the next `apply` call.
    pub fn push_outcome(&self, outcome: ActionOutcome) {
        self.outcomes.lock().unwrap().push_back(Ok(outcome));
    }

    /// Queue one error for the next `apply` call.
    pub fn push_error(&self, error: ExecutorError) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    /// Outcome returned once the queue is drained.
    pub fn repeat_outcome(&self, outcome: ActionOutcome) {
        *self.repeat.lock().unwrap() = Some(outcome);
    }

    /// Make every subsequent `restore` fail with `RevertFailed`.
    pub fn fail_restores(&self) {
        self.fail_restores.store(true, Ordering::SeqCst);
    }

    /// Checkpoints that `restore` was called with, in order.
    pub fn restores(&self) -> Vec<CheckpointId> {
        self.restores.lock().unwrap().clone()
    }

    /// Actions that `apply` was called with, in order.
    pub fn applied(&self) -> Vec<ProposedAction> {
        self.applied.lock().unwrap().clone()
    }

    pub fn checkpoints_taken(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn apply(&self, action: &ProposedAction) -> Result<ActionOutcome, ExecutorError> {
        self.applied.lock().unwrap().push(action.clone());

        if let Some(scripted) = self.outcomes.lock().unwrap().pop_front() {
            return scripted;
        }
        if let Some(fallback) = self.repeat.lock().unwrap().clone() {
            return Ok(fallback);
        }
        Ok(ActionOutcome::no_op())
    }

    async fn checkpoint(&self) -> Result<CheckpointId, ExecutorError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CheckpointId::new(format!("ckpt-{:03}", n)))
    }

    async fn restore(&self, checkpoint: &CheckpointId) -> Result<(), ExecutorError> {
        if self.fail_restores.load(Ordering::SeqCst) {
            return Err(ExecutorError::RevertFailed {
                checkpoint: checkpoint.to_string(),
                details: "scripted restore failure".to_string(),
            });
        }
        self.restores.lock().unwrap().push(checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let executor = ScriptedExecutor::new();
        executor.push_outcome(ActionOutcome::from_diff("--- a/f\n+++ b/f\n+one\n"));
        executor.push_outcome(ActionOutcome::from_diff("--- a/f\n+++ b/f\n+two\n"));

        let action = ProposedAction::new("step");
        let first = executor.apply(&action).await.unwrap();
        let second = executor.apply(&action).await.unwrap();

        assert!(first.diff.contains("one"));
        assert!(second.diff.contains("two"));
        assert_eq!(executor.applied().len(), 2);
    }

    #[tokio::test]
    async fn test_drained_queue_falls_back_to_repeat_then_noop() {
        let executor = ScriptedExecutor::new();
        executor.push_outcome(ActionOutcome::from_diff("--- a/f\n+++ b/f\n+x\n"));
        executor.repeat_outcome(ActionOutcome::from_diff("--- a/f\n+++ b/f\n+again\n"));

        let action = ProposedAction::new("step");
        executor.apply(&action).await.unwrap();
        let fallback = executor.apply(&action).await.unwrap();
        assert!(fallback.diff.contains("again"));

        let bare = ScriptedExecutor::new();
        let noop = bare.apply(&action).await.unwrap();
        assert!(noop.diff_stat.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let executor = ScriptedExecutor::new();
        executor.push_error(ExecutorError::Timeout { elapsed_ms: 50 });

        let result = executor.apply(&ProposedAction::new("step")).await;
        assert!(matches!(result, Err(ExecutorError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_synthetic_checkpoints_and_restores() {
        let executor = ScriptedExecutor::new();
        let first = executor.checkpoint().await.unwrap();
        let second = executor.checkpoint().await.unwrap();
        assert_eq!(first.as_str(), "ckpt-001");
        assert_eq!(second.as_str(), "ckpt-002");
        assert_eq!(executor.checkpoints_taken(), 2);

        executor.restore(&first).await.unwrap();
        assert_eq!(executor.restores(), vec![first]);
    }

    #[tokio::test]
    async fn test_fail_restores() {
        let executor = ScriptedExecutor::new();
        executor.fail_restores();
        let checkpoint = executor.checkpoint().await.unwrap();

        let result = executor.restore(&checkpoint).await;
        assert!(matches!(result, Err(ExecutorError::RevertFailed { .. })));
        assert!(executor.restores().is_empty());
    }
}
