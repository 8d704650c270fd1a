//! Session runner - drives one task through the iterate, check, correct loop.
//!
//! Each iteration:
//! 1. Snapshots the workspace
//! 2. Asks the provider for one action, with accumulated reviewer feedback
//! 3. Applies the action through the tool executor
//! 4. Runs the acceptance check
//! 5. Has the reviewer keep, revert, or annotate the change
//! 6. Terminates on pass, exhausted budget, or a fatal condition
//!
//! Transient provider, executor, and evaluator failures are retried against
//! a per-iteration budget; once the budget is gone the iteration degrades to
//! a recorded no-op and the session moves on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Result;
use crate::evaluator::{CriteriaEvaluator, EvalError, EvalResult};
use crate::executor::{CheckpointId, ExecutorError, ToolExecutor};
use crate::provider::{CompletionContext, CompletionProvider, ProposedAction, ProviderError};
use crate::review::Reviewer;
use crate::session::{ActionRecord, SessionOutcome, SessionState, SessionStatus, Task};
use crate::storage::{OutcomeLine, SessionHeader, SessionStore};

/// Configuration for the SessionRunner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Transient-failure retries available to each iteration
    pub retries_per_iteration: u32,
    /// Upper bound on any single provider or evaluator call
    pub call_timeout_ms: u64,
    /// Pause between transient retries
    pub retry_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retries_per_iteration: 2,
            call_timeout_ms: 120_000,
            retry_delay_ms: 500,
        }
    }
}

/// Cooperative cancellation flag shared with the caller.
///
/// Cancellation is observed at iteration boundaries and after an action
/// lands; it never interrupts a revert.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// SessionRunner executes a single session to a terminal outcome.
pub struct SessionRunner<P, X, E>
where
    P: CompletionProvider,
    X: ToolExecutor,
    E: CriteriaEvaluator,
{
    /// Provider proposing the next action
    provider: Arc<P>,
    /// Executor applying actions to the workspace
    executor: Arc<X>,
    /// Evaluator running the acceptance check
    evaluator: Arc<E>,
    /// Reviewer deciding each iteration's verdict
    reviewer: Reviewer,
    /// Retry and timeout tuning
    config: RunnerConfig,
    /// Optional persistence sink; storage failures never stop a session
    store: Option<Arc<SessionStore>>,
    /// Cancellation flag
    cancel: CancelToken,
}

impl<P, X, E> SessionRunner<P, X, E>
where
    P: CompletionProvider,
    X: ToolExecutor,
    E: CriteriaEvaluator,
{
    /// Create a new SessionRunner with default reviewer and configuration.
    pub fn new(provider: Arc<P>, executor: Arc<X>, evaluator: Arc<E>) -> Self {
        Self {
            provider,
            executor,
            evaluator,
            reviewer: Reviewer::default(),
            config: RunnerConfig::default(),
            store: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_reviewer(mut self, reviewer: Reviewer) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the task until the acceptance check passes, the iteration budget
    /// runs out, or a fatal condition aborts the session.
    pub async fn run(&self, task: Task) -> Result<SessionOutcome> {
        let mut state = SessionState::new(task)?;
        info!("session {} started: {}", state.id, state.task.goal);
        self.persist_header(&state);

        // Pre-flight: the task may already be done. This check is iteration
        // zero; it appends no record.
        let mut retries = self.config.retries_per_iteration;
        match self.evaluate_with_retries(&state.task, &mut retries).await {
            Ok(eval) if eval.passed => {
                info!("session {}: acceptance check already passing", state.id);
                state.last_eval = Some(eval);
                state.finish(SessionStatus::Succeeded)?;
                return self.seal(state, "acceptance check passed before any iteration".to_string());
            }
            Ok(eval) => {
                debug!("pre-flight check failed: {}", eval.summary(1));
                state.last_eval = Some(eval);
            }
            Err(e) => {
                warn!("pre-flight acceptance check unavailable: {}", e);
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                info!("session {} cancelled", state.id);
                return self.finish_aborted(state, "cancelled before iteration start".to_string());
            }

            let iteration = state.iteration + 1;
            let mut retries = self.config.retries_per_iteration;
            debug!(
                "session {}: iteration {}/{}",
                state.id, iteration, state.task.max_iterations
            );

            // 1. Snapshot the workspace before anything mutates it
            let checkpoint_before = match self.checkpoint_with_retries(&mut retries).await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    let fallback = last_checkpoint(&state);
                    self.append_degraded(
                        &mut state,
                        iteration,
                        fallback,
                        format!("could not snapshot the workspace: {}", e),
                    )?;
                    match self.check_termination(&mut state)? {
                        Some(diagnostics) => return self.seal(state, diagnostics),
                        None => continue,
                    }
                }
            };

            // 2. Ask the provider for the next action
            let context = self.build_context(&state, iteration);
            let action = match self.propose_with_retries(&context, &mut retries).await {
                Ok(action) => action,
                Err(e) => {
                    self.append_degraded(
                        &mut state,
                        iteration,
                        checkpoint_before,
                        format!("provider produced no action: {}", e),
                    )?;
                    match self.check_termination(&mut state)? {
                        Some(diagnostics) => return self.seal(state, diagnostics),
                        None => continue,
                    }
                }
            };
            info!("iteration {}: {}", iteration, action.description);

            // 3. Apply it. On failure the snapshot is restored so the
            // iteration is a true no-op.
            let outcome = match self.apply_with_retries(&action, &mut retries).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Err(restore_err) =
                        self.restore_with_retries(&checkpoint_before, &mut retries).await
                    {
                        return self.finish_aborted(
                            state,
                            format!(
                                "rollback of iteration {} failed: {}; workspace may be inconsistent",
                                iteration, restore_err
                            ),
                        );
                    }
                    self.append_degraded(
                        &mut state,
                        iteration,
                        checkpoint_before,
                        format!("action could not be applied: {}", e),
                    )?;
                    match self.check_termination(&mut state)? {
                        Some(diagnostics) => return self.seal(state, diagnostics),
                        None => continue,
                    }
                }
            };

            if self.cancel.is_cancelled() {
                let checkpoint_after = self.checkpoint_with_retries(&mut retries).await.ok();
                let mut record = ActionRecord::interrupted(
                    iteration,
                    checkpoint_before,
                    checkpoint_after,
                    "cancelled while the action was landing",
                );
                record.failure_signature = Reviewer::signature_for(&record);
                state.record(record.clone())?;
                self.persist_record(&state, &record);
                info!("session {} cancelled mid-iteration", state.id);
                return self.finish_aborted(
                    state,
                    "cancelled mid-iteration; the last action was kept unreviewed".to_string(),
                );
            }

            // 4. Pin the post-action state, then run the acceptance check
            let checkpoint_after = match self.checkpoint_with_retries(&mut retries).await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    if let Err(restore_err) =
                        self.restore_with_retries(&checkpoint_before, &mut retries).await
                    {
                        return self.finish_aborted(
                            state,
                            format!(
                                "rollback of iteration {} failed: {}; workspace may be inconsistent",
                                iteration, restore_err
                            ),
                        );
                    }
                    self.append_degraded(
                        &mut state,
                        iteration,
                        checkpoint_before,
                        format!("could not snapshot the applied action: {}", e),
                    )?;
                    match self.check_termination(&mut state)? {
                        Some(diagnostics) => return self.seal(state, diagnostics),
                        None => continue,
                    }
                }
            };

            let eval = match self.evaluate_with_retries(&state.task, &mut retries).await {
                Ok(eval) => Some(eval),
                Err(e) => {
                    // The change stays; the next iteration hears about it
                    warn!("acceptance check unavailable on iteration {}: {}", iteration, e);
                    None
                }
            };

            let mut record = ActionRecord::completed(
                iteration,
                &action.description,
                &outcome,
                checkpoint_before.clone(),
                checkpoint_after,
                eval,
            );
            if record.eval.is_none() {
                state.feedback = Some(
                    "the acceptance check could not run last iteration; keep the change coherent"
                        .to_string(),
                );
            }

            // 5. Review the change
            record.verdict = self.reviewer.review(&state.history, &record);

            if record.verdict.is_revert() {
                info!("reviewer reverted iteration {}", iteration);
                if let Err(e) = self.restore_with_retries(&checkpoint_before, &mut retries).await {
                    record.failure_signature = Reviewer::signature_for(&record);
                    state.record(record.clone())?;
                    self.persist_record(&state, &record);
                    return self.finish_aborted(
                        state,
                        format!(
                            "revert of iteration {} failed: {}; workspace may be inconsistent",
                            iteration, e
                        ),
                    );
                }
                record.checkpoint_after = checkpoint_before;
                state.feedback = Some(format!(
                    "your previous change was reverted because it regressed the acceptance check; diagnostics before the revert: {}",
                    record.eval.as_ref().map(|e| e.summary(3)).unwrap_or_default()
                ));
            } else if let Some(feedback) = record.verdict.feedback() {
                state.feedback = Some(feedback.to_string());
            } else if record.eval.is_some() {
                state.feedback = None;
            }

            // 6. Append the record and decide whether to stop
            record.failure_signature = Reviewer::signature_for(&record);
            state.record(record.clone())?;
            self.persist_record(&state, &record);

            if let Some(diagnostics) = self.check_termination(&mut state)? {
                return self.seal(state, diagnostics);
            }
        }
    }

    /// Ordered termination decision, applied after every appended record:
    /// success first, then budget exhaustion, then fatal repetition.
    fn check_termination(&self, state: &mut SessionState) -> Result<Option<String>> {
        let last = state.history.last();

        if last.map(|r| r.passed()).unwrap_or(false) {
            state.finish(SessionStatus::Succeeded)?;
            return Ok(Some("acceptance check passed".to_string()));
        }

        if state.budget_exhausted() {
            state.finish(SessionStatus::Failed)?;
            let mut diagnostics = format!(
                "iteration budget of {} exhausted without passing the acceptance check",
                state.task.max_iterations
            );
            if let Some(text) = state.history.last().and_then(|r| r.failure_text()) {
                diagnostics.push_str("; last diagnostics: ");
                diagnostics.push_str(text);
            }
            return Ok(Some(diagnostics));
        }

        if let Some(signature) = self.reviewer.detect_fatal(&state.history) {
            state.finish(SessionStatus::Aborted)?;
            return Ok(Some(format!(
                "aborted: failure signature {} repeated {} times in a row",
                signature,
                self.reviewer.policy().fatal_repeat_threshold
            )));
        }

        Ok(None)
    }

    /// Append a no-op record for an iteration that lost its retry budget.
    fn append_degraded(
        &self,
        state: &mut SessionState,
        iteration: u32,
        checkpoint: CheckpointId,
        reason: String,
    ) -> Result<()> {
        warn!("iteration {} degraded to a no-op: {}", iteration, reason);
        let mut record = ActionRecord::degraded(iteration, checkpoint, reason);
        record.failure_signature = Reviewer::signature_for(&record);
        state.feedback = record.verdict.feedback().map(str::to_string);
        state.record(record.clone())?;
        self.persist_record(state, &record);
        Ok(())
    }

    fn finish_aborted(&self, mut state: SessionState, diagnostics: String) -> Result<SessionOutcome> {
        state.finish(SessionStatus::Aborted)?;
        self.seal(state, diagnostics)
    }

    /// Turn the finished state into the outcome handed to the caller.
    fn seal(&self, state: SessionState, diagnostics: String) -> Result<SessionOutcome> {
        let outcome = state.into_outcome(diagnostics);
        info!(
            "session {} finished: {} after {} iteration(s)",
            outcome.session_id, outcome.status, outcome.iterations_used
        );
        self.persist_outcome(&outcome);
        Ok(outcome)
    }

    fn build_context(&self, state: &SessionState, iteration: u32) -> CompletionContext {
        CompletionContext {
            goal: state.task.goal.clone(),
            acceptance_command: state.task.criterion.command.clone(),
            iteration,
            history_digest: history_digest(&state.history, 3),
            feedback: state.feedback.clone(),
        }
    }

    /// One provider call under the call timeout.
    async fn propose(&self, context: &CompletionContext) -> std::result::Result<ProposedAction, ProviderError> {
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(timeout, self.provider.complete(context)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                elapsed_ms: self.config.call_timeout_ms,
            }),
        }
    }

    async fn propose_with_retries(
        &self,
        context: &CompletionContext,
        retries: &mut u32,
    ) -> std::result::Result<ProposedAction, ProviderError> {
        loop {
            match self.propose(context).await {
                Ok(action) => return Ok(action),
                Err(ProviderError::RateLimited { retry_after }) if *retries > 0 => {
                    *retries -= 1;
                    warn!("provider rate limited, waiting {:?} ({} retries left)", retry_after, retries);
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) if e.is_retryable() && *retries > 0 => {
                    *retries -= 1;
                    warn!("provider call failed ({}), retrying ({} left)", e, retries);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_with_retries(
        &self,
        action: &ProposedAction,
        retries: &mut u32,
    ) -> std::result::Result<crate::executor::ActionOutcome, ExecutorError> {
        loop {
            match self.executor.apply(action).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && *retries > 0 => {
                    *retries -= 1;
                    warn!("action failed to apply ({}), retrying ({} left)", e, retries);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn checkpoint_with_retries(
        &self,
        retries: &mut u32,
    ) -> std::result::Result<CheckpointId, ExecutorError> {
        loop {
            match self.executor.checkpoint().await {
                Ok(checkpoint) => return Ok(checkpoint),
                Err(e) if e.is_retryable() && *retries > 0 => {
                    *retries -= 1;
                    warn!("checkpoint failed ({}), retrying ({} left)", e, retries);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn restore_with_retries(
        &self,
        checkpoint: &CheckpointId,
        retries: &mut u32,
    ) -> std::result::Result<(), ExecutorError> {
        loop {
            match self.executor.restore(checkpoint).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && *retries > 0 => {
                    *retries -= 1;
                    warn!("restore failed ({}), retrying ({} left)", e, retries);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One acceptance check under the call timeout.
    async fn evaluate(&self, task: &Task) -> std::result::Result<EvalResult, EvalError> {
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(
            timeout,
            self.evaluator.evaluate(&task.criterion, &task.workspace_path),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EvalError::Unavailable(format!(
                "acceptance check still running after {}ms",
                self.config.call_timeout_ms
            ))),
        }
    }

    async fn evaluate_with_retries(
        &self,
        task: &Task,
        retries: &mut u32,
    ) -> std::result::Result<EvalResult, EvalError> {
        loop {
            match self.evaluate(task).await {
                Ok(eval) => return Ok(eval),
                Err(e) if e.is_retryable() && *retries > 0 => {
                    *retries -= 1;
                    warn!("acceptance check unavailable ({}), retrying ({} left)", e, retries);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn persist_header(&self, state: &SessionState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.append_header(&SessionHeader::for_session(state)) {
                warn!("failed to persist session header: {}", e);
            }
        }
    }

    fn persist_record(&self, state: &SessionState, record: &ActionRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.append_record(&state.id, record) {
                warn!("failed to persist iteration {}: {}", record.iteration, e);
            }
        }
    }

    fn persist_outcome(&self, outcome: &SessionOutcome) {
        if let Some(store) = &self.store {
            let line = OutcomeLine::new(
                outcome.status,
                outcome.iterations_used,
                outcome.final_diagnostics.clone(),
            );
            if let Err(e) = store.append_outcome(&outcome.session_id, &line) {
                warn!("failed to persist outcome for {}: {}", outcome.session_id, e);
            }
        }
    }
}

/// Most recent known checkpoint, for degraded records taken before a new
/// snapshot existed.
fn last_checkpoint(state: &SessionState) -> CheckpointId {
    state
        .history
        .last()
        .map(|r| r.checkpoint_after.clone())
        .unwrap_or_else(CheckpointId::unknown)
}

/// Compact rendering of the trailing records for the prompt.
fn history_digest(history: &[ActionRecord], max: usize) -> String {
    let start = history.len().saturating_sub(max);
    let mut lines = Vec::new();
    for record in &history[start..] {
        let check = match &record.eval {
            Some(e) if e.passed => "check passed".to_string(),
            Some(e) => format!("check failed: {}", e.summary(1)),
            None => "check not run".to_string(),
        };
        lines.push(format!(
            "{}. [{}] {} ({})",
            record.iteration,
            record.verdict.label(),
            record.description,
            check
        ));
    }
    lines.join("\n")
}
