//! Completion provider layer
//!
//! The provider is the opaque "propose the next change" capability. Given
//! the task, recent history, and any reviewer feedback, it returns one
//! reviewable unit of work: a description plus a unified diff and/or shell
//! commands. The control loop owns retries; the provider only classifies
//! its failures as retryable or not.

pub mod anthropic;
pub mod mock;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use mock::MockProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Everything a provider sees for one proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionContext {
    /// The task goal, verbatim
    pub goal: String,

    /// The acceptance command the change must satisfy
    pub acceptance_command: String,

    /// Iteration about to run, 1-based
    pub iteration: u32,

    /// Digest of prior iterations (descriptions and check results)
    pub history_digest: String,

    /// Reviewer feedback from the previous iteration, if any
    pub feedback: Option<String>,
}

impl CompletionContext {
    /// System instructions shared by every iteration
    pub fn system_prompt(&self) -> String {
        concat!(
            "You are a coding agent working inside a git workspace. ",
            "Propose exactly one coherent change toward the goal. ",
            "Reply with a one-line description of the change, then either a ",
            "unified diff in a ```diff fence or shell commands in a ```sh fence. ",
            "Do not explain; do not propose more than one change."
        )
        .to_string()
    }

    /// Per-iteration user prompt
    pub fn user_prompt(&self) -> String {
        let mut prompt = format!(
            "## Goal\n{}\n\n## Acceptance check\n`{}` must exit 0.\n\n## Iteration\n{}\n",
            self.goal, self.acceptance_command, self.iteration
        );
        if !self.history_digest.is_empty() {
            prompt.push_str(&format!("\n## Previous iterations\n{}\n", self.history_digest));
        }
        if let Some(feedback) = &self.feedback {
            prompt.push_str(&format!("\n## Reviewer feedback\n{}\n", feedback));
        }
        prompt
    }
}

/// One reviewable unit of work proposed by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// One-line description of the change
    pub description: String,

    /// Unified diff to apply, if the provider proposed an edit
    pub diff: Option<String>,

    /// Shell commands to run, if the provider proposed commands
    pub commands: Vec<String>,
}

impl ProposedAction {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            diff: None,
            commands: Vec::new(),
        }
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// True when the proposal contains neither a diff nor commands
    pub fn is_empty(&self) -> bool {
        self.diff.as_deref().map(|d| d.trim().is_empty()).unwrap_or(true)
            && self.commands.is_empty()
    }
}

/// Errors from the completion provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Network(_) => true,
            ProviderError::Timeout { .. } => true,
            ProviderError::InvalidResponse(_) => false,
            ProviderError::Json(_) => false,
            ProviderError::MissingApiKey { .. } => false,
        }
    }
}

/// Stateless proposal capability; each call is independent
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, context: &CompletionContext) -> Result<ProposedAction, ProviderError>;
}
