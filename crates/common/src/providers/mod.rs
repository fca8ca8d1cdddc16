//! Upstream AI provider abstraction
//!
//! Provides a unified chat-completion interface over:
//! - OpenAI-compatible `/chat/completions` endpoints
//! - Anthropic `/messages`
//! - A deterministic mock for development and tests
//!
//! The [`ProviderRouter`] picks among registered providers per request.

mod anthropic;
pub mod circuit;
mod mock;
mod openai;
pub mod registry;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use circuit::{CircuitBreaker, CircuitPermit, CircuitState};
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use registry::{ProviderRegistry, ProviderStatus};
pub use router::{
    Constraints, CostPreference, Preferences, QualityPreference, RouteOptions, RouteRequest,
    RouteResponse, ProviderRouter,
};

use crate::config::{ProviderConfig, ProviderKind};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A chat message in provider-neutral form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A completion request after routing decisions are made
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Conversation, ending with the user's prompt
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A provider's answer
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Trait for chat-completion providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registered provider name
    fn name(&self) -> &str;

    /// Run a single completion; no retries
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Rough token estimate: one token per four characters
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4).max(1)
}

/// Create a provider client from its definition
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.kind {
        ProviderKind::Openai => Ok(Arc::new(OpenAiProvider::new(config)?)),
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicProvider::new(config)?)),
        ProviderKind::Mock => Ok(Arc::new(MockProvider::new(&config.name, &config.model))),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

pub(crate) fn require_api_key(config: &ProviderConfig) -> Result<String> {
    config.api_key.clone().ok_or_else(|| AppError::Configuration {
        message: format!("provider '{}' requires an api_key", config.name),
    })
}

/// Map a non-success upstream status to an error; 429 and 5xx are retryable
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> AppError {
    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    let detail: String = body.chars().take(200).collect();

    AppError::Provider {
        provider: provider.to_string(),
        message: format!("API error {}: {}", status, detail),
        retryable,
    }
}

/// Map a transport failure to an error
pub(crate) fn transport_error(provider: &str, err: reqwest::Error, timeout: Duration) -> AppError {
    if err.is_timeout() {
        AppError::ProviderTimeout {
            provider: provider.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        AppError::Provider {
            provider: provider.to_string(),
            message: format!("Request failed: {}", err),
            retryable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn test_status_error_retryability() {
        assert!(status_error("p", StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error("p", StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error("p", StatusCode::BAD_REQUEST, "bad").is_retryable());
    }

    #[test]
    fn test_create_mock_provider() {
        let provider = create_provider(&ProviderConfig::mock("local")).unwrap();
        assert_eq!(provider.name(), "local");
    }

    #[test]
    fn test_remote_provider_needs_key() {
        let mut config = ProviderConfig::mock("openai");
        config.kind = ProviderKind::Openai;
        assert!(create_provider(&config).is_err());
    }
}
