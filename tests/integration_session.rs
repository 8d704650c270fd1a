//! Full session integration tests
//!
//! Drives the session runner end to end against real git workspaces, the
//! shell evaluator, and on-disk session storage, with a scripted provider.

use std::process::Command as StdCommand;
use std::sync::Arc;

use hone::error::Result;
use hone::evaluator::{CommandEvaluator, EvalConfig};
use hone::executor::{GitExecutor, ScriptedExecutor};
use hone::id::{generate_session_id, now_ms};
use hone::provider::{CompletionProvider, MockProvider, ProposedAction};
use hone::report::render_report;
use hone::runner::{CancelToken, SessionRunner};
use hone::session::{SessionStatus, Task, Verdict};
use hone::storage::SessionStore;
use tempfile::TempDir;

fn git(dir: &std::path::Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {:?} failed", args);
}

/// Initialize a git repo with an initial commit so checkpoints have a base.
fn setup_test_repo(dir: &TempDir) {
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    std::fs::write(dir.path().join("README.md"), "# test repo\n").unwrap();
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-q", "-m", "initial"]);
}

/// Integration test: verify the scripted provider double works
#[tokio::test]
async fn test_mock_provider_basics() {
    let provider = MockProvider::new();
    provider.push_action(ProposedAction::new("write the fix"));

    let context = hone::provider::CompletionContext {
        goal: "g".to_string(),
        acceptance_command: "true".to_string(),
        iteration: 1,
        history_digest: String::new(),
        feedback: None,
    };
    let action = provider.complete(&context).await.unwrap();
    assert_eq!(action.description, "write the fix");
    assert_eq!(provider.calls(), 1);
}

/// Integration test: a session succeeds against a real git workspace once
/// the proposed command satisfies the acceptance check
#[tokio::test]
async fn test_session_succeeds_against_git_workspace() -> Result<()> {
    let repo = TempDir::new()?;
    setup_test_repo(&repo);
    let data = TempDir::new()?;

    let provider = Arc::new(MockProvider::new());
    provider.push_action(
        ProposedAction::new("create the done marker").with_command("printf done > done.txt"),
    );

    let executor = Arc::new(GitExecutor::open(repo.path()).await?);
    let evaluator = Arc::new(CommandEvaluator::new(EvalConfig::default()));
    let store = Arc::new(SessionStore::open(data.path())?);

    let runner = SessionRunner::new(provider, executor, evaluator).with_store(store.clone());
    let task = Task::new("produce done.txt", "test -f done.txt", repo.path()).with_max_iterations(3);

    let outcome = runner.run(task).await?;

    assert_eq!(outcome.status, SessionStatus::Succeeded);
    assert_eq!(outcome.iterations_used, 1);
    assert!(repo.path().join("done.txt").exists());

    // The persisted log matches what the runner returned
    let session = store.load_session(&outcome.session_id)?;
    assert_eq!(session.header.goal, "produce done.txt");
    assert_eq!(session.records.len(), 1);
    assert!(matches!(session.records[0].verdict, Verdict::Accept));
    assert!(session.records[0].passed());
    assert_eq!(session.status(), SessionStatus::Succeeded);

    let report = render_report(&session);
    assert!(report.contains("**Status:** succeeded"));
    assert!(report.contains("## Iteration 1"));
    assert!(report.contains("**Check:** passed"));

    Ok(())
}

/// Integration test: a regressing, deletion-heavy change is reverted on disk
/// and the record pins the restored checkpoint
#[tokio::test]
async fn test_regression_is_reverted_on_disk() -> Result<()> {
    let repo = TempDir::new()?;
    setup_test_repo(&repo);
    let data_lines: String = (1..=60).map(|n| format!("line {}\n", n)).collect();
    std::fs::write(repo.path().join("data.txt"), &data_lines).unwrap();
    std::fs::write(repo.path().join("errors.txt"), "one\n").unwrap();
    git(repo.path(), &["add", "-A"]);
    git(repo.path(), &["commit", "-q", "-m", "seed"]);

    let data = TempDir::new()?;
    let provider = Arc::new(MockProvider::new());
    // Iteration 1 changes nothing and establishes the failure baseline.
    // Iteration 2 wipes data.txt and makes the check noisier: a regression
    // with far more deletions than additions.
    provider.push_action(ProposedAction::new("hold position").with_command("true"));
    let damage = ProposedAction::new("rewrite the module")
        .with_command("printf 'alpha\\nbeta\\ngamma\\ndelta\\n' > errors.txt")
        .with_command(": > data.txt");
    provider.push_action(damage);

    let executor = Arc::new(GitExecutor::open(repo.path()).await?);
    let evaluator = Arc::new(CommandEvaluator::new(EvalConfig::default()));
    let store = Arc::new(SessionStore::open(data.path())?);

    let runner = SessionRunner::new(provider, executor, evaluator).with_store(store.clone());
    let task = Task::new(
        "quiet the error log",
        "cat errors.txt; exit 1",
        repo.path(),
    )
    .with_max_iterations(2);

    let outcome = runner.run(task).await?;

    // Never passes, so the budget runs out
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.iterations_used, 2);

    // The damage was rolled back in the working tree
    let restored = std::fs::read_to_string(repo.path().join("data.txt")).unwrap();
    assert_eq!(restored, data_lines);
    let errors = std::fs::read_to_string(repo.path().join("errors.txt")).unwrap();
    assert_eq!(errors, "one\n");

    let session = store.load_session(&outcome.session_id)?;
    assert_eq!(session.records.len(), 2);
    assert!(matches!(session.records[0].verdict, Verdict::Accept));
    assert!(session.records[1].verdict.is_revert());
    assert_eq!(
        session.records[1].checkpoint_after,
        session.records[1].checkpoint_before
    );

    Ok(())
}

/// Integration test: revert feedback reaches the next provider prompt
#[tokio::test]
async fn test_revert_feedback_reaches_next_prompt() -> Result<()> {
    let repo = TempDir::new()?;
    setup_test_repo(&repo);
    std::fs::write(repo.path().join("data.txt"), "a\nb\nc\nd\ne\nf\ng\nh\n").unwrap();
    std::fs::write(repo.path().join("errors.txt"), "one\n").unwrap();
    git(repo.path(), &["add", "-A"]);
    git(repo.path(), &["commit", "-q", "-m", "seed"]);

    let data = TempDir::new()?;
    let provider = Arc::new(MockProvider::new());
    provider.push_action(ProposedAction::new("look around").with_command("true"));
    provider.push_action(
        ProposedAction::new("rework everything")
            .with_command("printf 'p\\nq\\nr\\ns\\n' > errors.txt")
            .with_command(": > data.txt"),
    );
    provider.repeat_action(ProposedAction::new("wait").with_command("true"));

    let executor = Arc::new(GitExecutor::open(repo.path()).await?);
    let evaluator = Arc::new(CommandEvaluator::new(EvalConfig::default()));
    let store = Arc::new(SessionStore::open(data.path())?);

    let runner =
        SessionRunner::new(provider.clone(), executor, evaluator).with_store(store);
    let task = Task::new("reduce errors", "cat errors.txt; exit 1", repo.path())
        .with_max_iterations(3);

    let outcome = runner.run(task).await?;
    assert_eq!(outcome.status, SessionStatus::Failed);

    // The prompt after the reverted iteration 2 carries the revert feedback
    let contexts = provider.contexts();
    assert_eq!(contexts.len(), 3);
    assert!(contexts[0].feedback.is_none());
    assert!(contexts[1].feedback.is_none());
    let feedback = contexts[2].feedback.as_deref().unwrap_or("");
    assert!(feedback.contains("reverted"), "feedback was: {}", feedback);

    Ok(())
}

/// Integration test: a task whose check already passes finishes without
/// consuming any iterations or touching the provider
#[tokio::test]
async fn test_preflight_pass_short_circuits() -> Result<()> {
    let workspace = TempDir::new()?;
    let data = TempDir::new()?;

    let provider = Arc::new(MockProvider::new());
    provider.repeat_action(ProposedAction::new("never used"));
    let executor = Arc::new(ScriptedExecutor::new());
    let evaluator = Arc::new(CommandEvaluator::new(EvalConfig::default()));
    let store = Arc::new(SessionStore::open(data.path())?);

    let runner =
        SessionRunner::new(provider.clone(), executor, evaluator).with_store(store.clone());
    let task = Task::new("nothing to do", "true", workspace.path());

    let outcome = runner.run(task).await?;

    assert_eq!(outcome.status, SessionStatus::Succeeded);
    assert_eq!(outcome.iterations_used, 0);
    assert!(outcome.history.is_empty());
    assert_eq!(provider.calls(), 0);

    let session = store.load_session(&outcome.session_id)?;
    assert!(session.records.is_empty());
    assert!(render_report(&session).contains("No iterations were recorded."));

    Ok(())
}

/// Integration test: verify session storage persistence across instances
#[tokio::test]
async fn test_storage_persistence_across_instances() -> Result<()> {
    let workspace = TempDir::new()?;
    let data = TempDir::new()?;
    let session_id;

    {
        let provider = Arc::new(MockProvider::new());
        let executor = Arc::new(ScriptedExecutor::new());
        let evaluator = Arc::new(CommandEvaluator::new(EvalConfig::default()));
        let store = Arc::new(SessionStore::open(data.path())?);
        let runner = SessionRunner::new(provider, executor, evaluator).with_store(store);

        let task = Task::new("noop", "true", workspace.path());
        let outcome = runner.run(task).await?;
        session_id = outcome.session_id;
    }

    // Reload from a fresh store instance
    let store = SessionStore::open(data.path())?;
    let summaries = store.list_sessions()?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, session_id);
    assert_eq!(summaries[0].status, SessionStatus::Succeeded);
    assert_eq!(summaries[0].iterations, 0);

    Ok(())
}

/// Integration test: a cancelled token aborts before any work happens
#[tokio::test]
async fn test_cancelled_session_is_aborted() -> Result<()> {
    let workspace = TempDir::new()?;
    let data = TempDir::new()?;

    let provider = Arc::new(MockProvider::new());
    provider.repeat_action(ProposedAction::new("never used"));
    let executor = Arc::new(ScriptedExecutor::new());
    let evaluator = Arc::new(CommandEvaluator::new(EvalConfig::default()));
    let store = Arc::new(SessionStore::open(data.path())?);

    let cancel = CancelToken::new();
    cancel.cancel();

    let runner = SessionRunner::new(provider.clone(), executor, evaluator)
        .with_store(store.clone())
        .with_cancel_token(cancel);
    // A failing check forces the loop to start iterating, which is where
    // cancellation is observed.
    let task = Task::new("unreachable", "false", workspace.path());

    let outcome = runner.run(task).await?;
    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.iterations_used, 0);
    assert_eq!(provider.calls(), 0);

    let session = store.load_session(&outcome.session_id)?;
    assert_eq!(session.status(), SessionStatus::Aborted);

    Ok(())
}

/// Integration test: verify record serialization round-trip through JSON
#[test]
fn test_record_serialization_roundtrip() -> Result<()> {
    use hone::evaluator::EvalResult;
    use hone::executor::{ActionOutcome, CheckpointId};
    use hone::session::ActionRecord;

    let outcome = ActionOutcome::from_diff("--- a/f\n+++ b/f\n@@ -1 +1 @@\n-x\n+y\n");
    let record = ActionRecord::completed(
        3,
        "swap x for y",
        &outcome,
        CheckpointId::new("before"),
        CheckpointId::new("after"),
        Some(EvalResult::fail("still broken").with_exit_code(2)),
    );

    let json = serde_json::to_string(&record)?;
    let restored: ActionRecord = serde_json::from_str(&json)?;

    assert_eq!(
        serde_json::to_value(&record)?,
        serde_json::to_value(&restored)?
    );
    Ok(())
}

/// Integration test: verify session ID generation uniqueness
#[test]
fn test_session_id_uniqueness() {
    let mut ids = std::collections::HashSet::new();

    for _ in 0..100 {
        let id = generate_session_id();
        assert!(ids.insert(id), "Generated duplicate ID");
    }
}

/// Integration test: verify now_ms returns sensible values
#[test]
fn test_now_ms_sensible() {
    let before = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let after = now_ms();

    assert!(after >= before, "Time should not go backwards");
    assert!(after - before >= 10, "At least 10ms should have passed");
}

/// Integration test: verify status text round-trips through FromStr
#[test]
fn test_status_parse_roundtrip() {
    for status in [
        SessionStatus::Running,
        SessionStatus::Succeeded,
        SessionStatus::Failed,
        SessionStatus::Aborted,
    ] {
        let parsed: SessionStatus = status.as_str().parse().unwrap();
        assert_eq!(parsed, status);
    }
    assert!("bogus".parse::<SessionStatus>().is_err());
}
