//! Anthropic API provider implementation
//!
//! Implements the CompletionProvider trait against the Anthropic Messages
//! API and parses the model's reply into a ProposedAction.

use crate::provider::{CompletionContext, CompletionProvider, ProposedAction, ProviderError};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

/// Anthropic API base URL
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model to use
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default max tokens
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Default environment variable holding the API key
const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Configuration for the Anthropic provider
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub api_key_env: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(120),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

impl AnthropicConfig {
    /// Create a config with a specific model
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Provider backed by the Anthropic Messages API
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create a provider, reading the API key from the configured
    /// environment variable
    pub fn new(config: AnthropicConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| ProviderError::MissingApiKey {
            env_var: config.api_key_env.clone(),
        })?;
        Self::with_api_key(api_key, config)
    }

    /// Create a provider with an explicit API key
    pub fn with_api_key(api_key: String, config: AnthropicConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Build the request body for the Messages API
    fn build_request(&self, context: &CompletionContext) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": context.system_prompt(),
            "messages": [
                {
                    "role": "user",
                    "content": context.user_prompt()
                }
            ]
        })
    }

    /// Send a request and map HTTP-level failures onto ProviderError
    async fn send_request(&self, body: Value) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Collect the text blocks from a Messages API response
    fn response_text(&self, body: &Value) -> Result<String, ProviderError> {
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| ProviderError::InvalidResponse("response has no content array".to_string()))?;

        let mut text = String::new();
        for block in blocks {
            if block["type"].as_str() == Some("text") {
                if let Some(t) = block["text"].as_str() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
            }
        }

        if text.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(
                "response contains no text".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Parse the model's reply into a ProposedAction
///
/// The first non-fence line becomes the description; a ```diff fence becomes
/// the proposed diff; ```sh / ```bash fences become commands, one per line.
pub(crate) fn parse_action(text: &str) -> ProposedAction {
    let mut description = String::new();
    let mut diff = String::new();
    let mut commands = Vec::new();

    let mut fence: Option<String> = None;
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("```") {
            match fence.take() {
                Some(_) => {}
                None => fence = Some(rest.trim().to_lowercase()),
            }
            continue;
        }

        match fence.as_deref() {
            Some("diff") | Some("patch") => {
                diff.push_str(line);
                diff.push('\n');
            }
            Some("sh") | Some("bash") | Some("shell") => {
                let cmd = line.trim();
                if !cmd.is_empty() && !cmd.starts_with('#') {
                    commands.push(cmd.to_string());
                }
            }
            Some(_) => {}
            None => {
                if description.is_empty() && !line.trim().is_empty() {
                    description = line.trim().to_string();
                }
            }
        }
    }

    if description.is_empty() {
        description = "unlabeled change".to_string();
    }

    let mut action = ProposedAction::new(description);
    if !diff.trim().is_empty() {
        action.diff = Some(diff);
    }
    action.commands = commands;
    action
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(&self, context: &CompletionContext) -> Result<ProposedAction, ProviderError> {
        debug!("requesting proposal for iteration {}", context.iteration);
        let body = self.build_request(context);
        let response = self.send_request(body).await?;
        let text = self.response_text(&response)?;
        Ok(parse_action(&text))
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}
