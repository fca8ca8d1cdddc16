//! Anthropic messages API

use super::{
    http_client, require_api_key, status_error, transport_error, ChatMessage, Completion,
    CompletionRequest, Provider, TokenUsage,
};
use crate::config::ProviderConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic client
pub struct AnthropicProvider {
    client: reqwest::Client,
    name: String,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout())?,
            name: config.name.clone(),
            api_key: require_api_key(config)?,
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = format!("{}/messages", self.base_url);

        // The messages API takes no system role inside `messages`
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .cloned()
            .collect();

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages,
            system: request.system_prompt.as_deref(),
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(&self.name, status, &body));
        }

        let result: MessagesResponse = response.json().await.map_err(|e| AppError::Provider {
            provider: self.name.clone(),
            message: format!("Failed to parse response: {}", e),
            retryable: false,
        })?;

        let content: String = result
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        if content.is_empty() {
            return Err(AppError::Provider {
                provider: self.name.clone(),
                message: "Empty response".to_string(),
                retryable: false,
            });
        }

        Ok(Completion {
            content,
            model: result.model.unwrap_or_else(|| self.model.clone()),
            usage: TokenUsage::new(result.usage.input_tokens, result.usage.output_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AnthropicProvider {
        let mut config = ProviderConfig::mock("anthropic");
        config.kind = ProviderKind::Anthropic;
        config.api_key = Some("ak-test".to_string());
        config.api_base = Some(server.uri());
        config.model = "claude-3-5-haiku".to_string();
        AnthropicProvider::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_completion_joins_text_blocks() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(serde_json::json!({ "system": "Be brief", "max_tokens": 32 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-3-5-haiku",
                "content": [
                    { "type": "text", "text": "Hello" },
                    { "type": "text", "text": " there" }
                ],
                "usage": { "input_tokens": 12, "output_tokens": 3 }
            })))
            .mount(&server)
            .await;

        let request = CompletionRequest {
            messages: vec![ChatMessage::user("Hi")],
            system_prompt: Some("Be brief".to_string()),
            temperature: None,
            max_tokens: 32,
        };

        let completion = provider(&server).complete(&request).await.unwrap();
        assert_eq!(completion.content, "Hello there");
        assert_eq!(completion.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_overloaded_is_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(529))
            .mount(&server)
            .await;

        let request = CompletionRequest {
            messages: vec![ChatMessage::user("Hi")],
            system_prompt: None,
            temperature: None,
            max_tokens: 32,
        };

        let err = provider(&server).complete(&request).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
