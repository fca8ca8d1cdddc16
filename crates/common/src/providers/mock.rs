//! Deterministic provider for development and tests

use super::{estimate_tokens, Completion, CompletionRequest, Provider, TokenUsage};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Echoes the prompt back; failures and latency can be scripted
pub struct MockProvider {
    name: String,
    model: String,
    /// Calls that fail before the provider starts answering; `u32::MAX` fails forever
    failures: AtomicU32,
    retryable: bool,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(name: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            failures: AtomicU32::new(0),
            retryable: true,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` calls
    pub fn with_failures(mut self, count: u32, retryable: bool) -> Self {
        self.failures = AtomicU32::new(count);
        self.retryable = retryable;
        self
    }

    /// Fail every call
    pub fn failing(self, retryable: bool) -> Self {
        self.with_failures(u32::MAX, retryable)
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls received so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure() {
            return Err(AppError::Provider {
                provider: self.name.clone(),
                message: "scripted failure".to_string(),
                retryable: self.retryable,
            });
        }

        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let content = format!("[{}] {}", self.name, prompt);

        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<u32>()
            + request.system_prompt.as_deref().map(estimate_tokens).unwrap_or(0);
        let completion_tokens = estimate_tokens(&content).min(request.max_tokens.max(1));

        Ok(Completion {
            content,
            model: self.model.clone(),
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            system_prompt: None,
            temperature: None,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn test_echoes_prompt() {
        let provider = MockProvider::new("local", "local-model");
        let completion = provider.complete(&request("ping")).await.unwrap();
        assert_eq!(completion.content, "[local] ping");
        assert_eq!(completion.model, "local-model");
        assert!(completion.usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let provider = MockProvider::new("flaky", "m").with_failures(2, true);

        assert!(provider.complete(&request("a")).await.is_err());
        assert!(provider.complete(&request("a")).await.is_err());
        assert!(provider.complete(&request("a")).await.is_ok());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_always_failing() {
        let provider = MockProvider::new("down", "m").failing(false);
        for _ in 0..3 {
            let err = provider.complete(&request("a")).await.unwrap_err();
            assert!(!err.is_retryable());
        }
    }
}
