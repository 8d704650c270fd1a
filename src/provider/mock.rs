//! Deterministic provider double for tests
//!
//! Scripted: pops queued results in order, then falls back to a repeating
//! action if one was set. Records every context it sees so tests can assert
//! on what the control loop sent.

use crate::provider::{CompletionContext, CompletionProvider, ProposedAction, ProviderError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Scripted CompletionProvider for tests
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Result<ProposedAction, ProviderError>>>,
    repeat: Mutex<Option<ProposedAction>>,
    seen: Mutex<Vec<CompletionContext>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action to return on the next unscripted call
    pub fn push_action(&self, action: ProposedAction) {
        self.script.lock().unwrap().push_back(Ok(action));
    }

    /// Queue an error to return on the next unscripted call
    pub fn push_error(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Action returned once the queue is empty
    pub fn repeat_action(&self, action: ProposedAction) {
        *self.repeat.lock().unwrap() = Some(action);
    }

    /// Number of complete() calls made so far
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Contexts received, in call order
    pub fn contexts(&self) -> Vec<CompletionContext> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, context: &CompletionContext) -> Result<ProposedAction, ProviderError> {
        self.seen.lock().unwrap().push(context.clone());

        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }
        if let Some(action) = self.repeat.lock().unwrap().clone() {
            return Ok(action);
        }
        Err(ProviderError::InvalidResponse(
            "mock script exhausted".to_string(),
        ))
    }
}
