//! Git-backed tool executor.
//!
//! Checkpoints are commits: `checkpoint` stages everything and commits
//! (allowing empty), `restore` is `reset --hard` + `clean -fd` back to the
//! recorded sha. `apply` lands the proposed diff with `git apply`, runs the
//! proposed commands through `sh -c`, then reads the resulting change back
//! out of git as a unified diff against the pre-action commit.

use super::{ActionOutcome, CheckpointId, DiffStat, ExecutorError, ToolExecutor};
use crate::provider::ProposedAction;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default per-command timeout when applying actions (20s)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 20_000;

/// Executes proposed actions against a git working tree.
#[derive(Debug)]
pub struct GitExecutor {
    workspace: PathBuf,
    command_timeout_ms: u64,
}

impl GitExecutor {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }

    pub fn with_command_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.command_timeout_ms = timeout_ms;
        self
    }

    /// Open an executor over an existing git working tree.
    ///
    /// Fails with `ExecutorError::Git` if the path is not inside one.
    pub async fn open(workspace: impl Into<PathBuf>) -> Result<Self, ExecutorError> {
        let executor = Self::new(workspace);
        let inside = executor.git_checked(&["rev-parse", "--is-inside-work-tree"]).await?;
        if inside.trim() != "true" {
            return Err(ExecutorError::Git(format!(
                "{} is not a git working tree",
                executor.workspace.display()
            )));
        }
        Ok(executor)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Run git with the given args and return the raw output.
    async fn git(&self, args: &[&str]) -> Result<std::process::Output, ExecutorError> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Run git, failing with the captured stderr on a non-zero exit.
    async fn git_checked(&self, args: &[&str]) -> Result<String, ExecutorError> {
        let output = self.git(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Git(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn head_sha(&self) -> Result<String, ExecutorError> {
        Ok(self.git_checked(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    async fn status_porcelain(&self) -> Result<String, ExecutorError> {
        self.git_checked(&["status", "--porcelain"]).await
    }

    /// Whether the working tree has no uncommitted or untracked changes.
    pub async fn is_clean(&self) -> Result<bool, ExecutorError> {
        Ok(self.status_porcelain().await?.is_empty())
    }

    /// Apply a unified diff to the working tree.
    ///
    /// A patch that does not apply is a normal action outcome, not an
    /// executor error: the rejection text goes to `stderr` so the reviewer
    /// and the next prompt can see it.
    async fn apply_diff(&self, diff: &str, stderr_acc: &mut String) -> Result<(), ExecutorError> {
        let mut child = Command::new("git")
            .args(["apply", "--whitespace=nowarn", "-"])
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(diff.as_bytes()).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let rejection = String::from_utf8_lossy(&output.stderr);
            warn!("patch did not apply: {}", rejection.trim());
            if !stderr_acc.is_empty() {
                stderr_acc.push('\n');
            }
            stderr_acc.push_str("git apply: ");
            stderr_acc.push_str(rejection.trim());
        }
        Ok(())
    }

    /// Run one proposed command through `sh -c` with the configured timeout.
    async fn run_shell(&self, command: &str) -> Result<std::process::Output, ExecutorError> {
        debug!("sh -c {:?}", command);
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let timeout = Duration::from_millis(self.command_timeout_ms);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(ExecutorError::Timeout {
                elapsed_ms: self.command_timeout_ms,
            }),
        }
    }

    /// Unified diff and numstat of staged changes relative to `base`.
    async fn staged_change(&self, base: &str) -> Result<(String, DiffStat), ExecutorError> {
        self.git_checked(&["add", "-A"]).await?;
        let diff = self.git_checked(&["diff", "--cached", base]).await?;
        let numstat = self.git_checked(&["diff", "--cached", "--numstat", base]).await?;
        Ok((diff, DiffStat::from_numstat(&numstat)))
    }
}

#[async_trait]
impl ToolExecutor for GitExecutor {
    async fn apply(&self, action: &ProposedAction) -> Result<ActionOutcome, ExecutorError> {
        let base = self.head_sha().await?;

        let mut stdout_acc = String::new();
        let mut stderr_acc = String::new();
        let mut exit_code = None;
        let mut commands_run = Vec::new();

        if let Some(diff) = &action.diff {
            self.apply_diff(diff, &mut stderr_acc).await?;
        }

        for command in &action.commands {
            let output = self.run_shell(command).await?;
            commands_run.push(command.clone());
            exit_code = output.status.code();

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stdout.trim().is_empty() {
                if !stdout_acc.is_empty() {
                    stdout_acc.push('\n');
                }
                stdout_acc.push_str(stdout.trim_end());
            }
            if !stderr.trim().is_empty() {
                if !stderr_acc.is_empty() {
                    stderr_acc.push('\n');
                }
                stderr_acc.push_str(stderr.trim_end());
            }
        }

        let (diff, diff_stat) = self.staged_change(&base).await?;
        debug!(
            "action changed {} file(s), +{} -{}",
            diff_stat.files_changed, diff_stat.added, diff_stat.removed
        );

        Ok(ActionOutcome {
            diff,
            diff_stat,
            commands: commands_run,
            exit_code,
            stdout: stdout_acc,
            stderr: stderr_acc,
        })
    }

    async fn checkpoint(&self) -> Result<CheckpointId, ExecutorError> {
        self.git_checked(&["add", "-A"]).await?;
        self.git_checked(&["commit", "--allow-empty", "--no-verify", "-m", "hone checkpoint"])
            .await?;
        let sha = self.head_sha().await?;
        debug!("checkpoint at {}", &sha[..sha.len().min(12)]);
        Ok(CheckpointId::new(sha))
    }

    async fn restore(&self, checkpoint: &CheckpointId) -> Result<(), ExecutorError> {
        let fail = |details: String| ExecutorError::RevertFailed {
            checkpoint: checkpoint.to_string(),
            details,
        };

        let reset = self
            .git(&["reset", "--hard", checkpoint.as_str()])
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !reset.status.success() {
            return Err(fail(String::from_utf8_lossy(&reset.stderr).trim().to_string()));
        }

        let clean = self
            .git(&["clean", "-fd"])
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !clean.status.success() {
            return Err(fail(String::from_utf8_lossy(&clean.stderr).trim().to_string()));
        }

        // Verify: HEAD must be the checkpoint and the tree must be clean,
        // otherwise the revert did not actually take.
        let head = self.head_sha().await.map_err(|e| fail(e.to_string()))?;
        if head != checkpoint.as_str() {
            return Err(fail(format!("HEAD is {} after reset", head)));
        }
        let dirty = !self.is_clean().await.map_err(|e| fail(e.to_string()))?;
        if dirty {
            return Err(fail("working tree still dirty after reset".to_string()));
        }

        debug!("restored checkpoint {}", checkpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn setup_test_repo() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let repo_path = temp.path().join("repo");
        std::fs::create_dir(&repo_path).unwrap();

        StdCommand::new("git")
            .args(["init"])
            .current_dir(&repo_path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(&repo_path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(&repo_path)
            .output()
            .unwrap();

        std::fs::write(repo_path.join("README.md"), "# Test\n").unwrap();
        StdCommand::new("git")
            .args(["add", "."])
            .current_dir(&repo_path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(&repo_path)
            .output()
            .unwrap();

        (temp, repo_path)
    }

    #[tokio::test]
    async fn test_open_rejects_non_repo() {
        let temp = TempDir::new().unwrap();
        let result = GitExecutor::open(temp.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_accepts_repo() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::open(&repo_path).await.unwrap();
        assert_eq!(executor.workspace(), repo_path.as_path());
    }

    #[tokio::test]
    async fn test_checkpoint_returns_head_sha() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let checkpoint = executor.checkpoint().await.unwrap();
        assert_eq!(checkpoint.as_str().len(), 40);

        let head = executor.head_sha().await.unwrap();
        assert_eq!(checkpoint.as_str(), head);
    }

    #[tokio::test]
    async fn test_checkpoint_captures_dirty_tree() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);

        std::fs::write(repo_path.join("new.txt"), "pending\n").unwrap();
        assert!(!executor.is_clean().await.unwrap());

        executor.checkpoint().await.unwrap();
        assert!(executor.is_clean().await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_runs_commands_and_reports_diff() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);
        executor.checkpoint().await.unwrap();

        let action = ProposedAction::new("add a file")
            .with_command("printf 'hello\\n' > hello.txt")
            .with_command("true");
        let outcome = executor.apply(&action).await.unwrap();

        assert_eq!(outcome.commands.len(), 2);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.diff.contains("hello"));
        assert_eq!(outcome.diff_stat.files_changed, 1);
        assert_eq!(outcome.diff_stat.added, 1);
    }

    #[tokio::test]
    async fn test_apply_captures_failing_command() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);
        executor.checkpoint().await.unwrap();

        let action =
            ProposedAction::new("fail").with_command("echo oops >&2; exit 3");
        let outcome = executor.apply(&action).await.unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stderr.contains("oops"));
        assert!(outcome.diff_stat.is_empty());
    }

    #[tokio::test]
    async fn test_apply_patch() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);
        executor.checkpoint().await.unwrap();

        let diff = "\
--- a/README.md
+++ b/README.md
@@ -1 +1,2 @@
 # Test
+patched line
";
        let action = ProposedAction::new("patch the readme").with_diff(diff);
        let outcome = executor.apply(&action).await.unwrap();

        assert_eq!(outcome.diff_stat.added, 1);
        let content = std::fs::read_to_string(repo_path.join("README.md")).unwrap();
        assert!(content.contains("patched line"));
    }

    #[tokio::test]
    async fn test_apply_bad_patch_is_outcome_not_error() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);
        executor.checkpoint().await.unwrap();

        let diff = "\
--- a/missing.txt
+++ b/missing.txt
@@ -1 +1 @@
-not there
+still not there
";
        let action = ProposedAction::new("bad patch").with_diff(diff);
        let outcome = executor.apply(&action).await.unwrap();

        assert!(outcome.stderr.contains("git apply"));
        assert!(outcome.diff_stat.is_empty());
    }

    #[tokio::test]
    async fn test_apply_command_timeout() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path).with_command_timeout_ms(200);
        executor.checkpoint().await.unwrap();

        let action = ProposedAction::new("hang").with_command("sleep 5");
        let result = executor.apply(&action).await;

        match result {
            Err(ExecutorError::Timeout { elapsed_ms }) => assert_eq!(elapsed_ms, 200),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_reverts_changes() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let checkpoint = executor.checkpoint().await.unwrap();
        let original = std::fs::read_to_string(repo_path.join("README.md")).unwrap();

        let action = ProposedAction::new("mutate")
            .with_command("echo garbage > README.md")
            .with_command("echo extra > extra.txt");
        executor.apply(&action).await.unwrap();

        executor.restore(&checkpoint).await.unwrap();

        let restored = std::fs::read_to_string(repo_path.join("README.md")).unwrap();
        assert_eq!(restored, original);
        assert!(!repo_path.join("extra.txt").exists());
        assert!(executor.is_clean().await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_unknown_sha_is_revert_failed() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);
        executor.checkpoint().await.unwrap();

        let bogus = CheckpointId::new("0000000000000000000000000000000000000000");
        let result = executor.restore(&bogus).await;

        match result {
            Err(ExecutorError::RevertFailed { checkpoint, .. }) => {
                assert!(checkpoint.starts_with("0000"));
            }
            other => panic!("expected revert failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_checkpoints_are_distinct_across_changes() {
        let (_temp, repo_path) = setup_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let first = executor.checkpoint().await.unwrap();
        std::fs::write(repo_path.join("a.txt"), "a\n").unwrap();
        let second = executor.checkpoint().await.unwrap();

        assert_ne!(first, second);
    }
}
