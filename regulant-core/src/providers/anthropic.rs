//! Anthropic Messages API provider.
//!
//! Implements `LlmProvider` against the native Anthropic Messages API.

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::LlmProvider;
use crate::types::{CompletionRequest, CompletionResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 4096;

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl AnthropicProvider {
    /// Create a new provider from configuration.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = super::resolve_api_key(config, "Anthropic")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Build the Messages API request body.
    ///
    /// The Messages API takes the system prompt as a top-level field, not as
    /// a message, and requires `max_tokens`.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut system_parts = Vec::new();
        let mut messages_json = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.clone()),
                Role::User => messages_json.push(json!({
                    "role": "user",
                    "content": msg.content,
                })),
                Role::Assistant => messages_json.push(json!({
                    "role": "assistant",
                    "content": msg.content,
                })),
            }
        }

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "messages": messages_json,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }

        body
    }

    /// Parse a Messages API response body into a CompletionResponse.
    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let content_blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No content array in response".to_string(),
            })?;

        let text = content_blocks
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                    block.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        let usage_obj = body.get("usage");
        let usage = TokenUsage {
            input_tokens: usage_obj
                .and_then(|u| u.get("input_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
            output_tokens: usage_obj
                .and_then(|u| u.get("output_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
        };

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        let finish_reason = body
            .get("stop_reason")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string());

        Ok(CompletionResponse {
            content: text,
            usage,
            model,
            finish_reason,
        })
    }

    /// Map an HTTP error status to a structured LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Anthropic".to_string(),
            },
            429 => {
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| v.get("retry_after")?.as_u64())
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            status => LlmError::ApiRequest {
                message: format!("Request failed ({}): {}", status, body),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/messages", self.base_url);

        debug!(model = %self.model, url = %url, "Sending Anthropic completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else if e.is_connect() {
                    LlmError::Connection {
                        message: format!("Connection failed: {}", e),
                    }
                } else {
                    LlmError::ApiRequest {
                        message: format!("Request to Anthropic API failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::types::Message;

    fn test_config() -> LlmConfig {
        LlmConfig {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_key: Some("sk-ant-test".to_string()),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }

    fn test_provider() -> AnthropicProvider {
        AnthropicProvider::new(&test_config()).unwrap()
    }

    #[test]
    fn test_build_request_body_hoists_system() {
        let provider = test_provider();
        let request = CompletionRequest {
            messages: vec![
                Message::system("You are a regulatory expert."),
                Message::user("What are design controls?"),
            ],
            temperature: 0.3,
            max_tokens: Some(1500),
            ..Default::default()
        };
        let body = provider.build_request_body(&request);

        assert_eq!(body["system"], "You are a regulatory expert.");
        assert_eq!(body["max_tokens"], 1500);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_build_request_body_default_max_tokens() {
        let provider = test_provider();
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = provider.build_request_body(&request);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let body = json!({
            "model": "claude-sonnet-4-5",
            "stop_reason": "end_turn",
            "content": [
                { "type": "text", "text": "Part one. " },
                { "type": "text", "text": "Part two." }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 6 }
        });
        let resp = AnthropicProvider::parse_response(&body).unwrap();
        assert_eq!(resp.content, "Part one. Part two.");
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_parse_response_missing_content() {
        let body = json!({ "model": "claude-sonnet-4-5" });
        let err = AnthropicProvider::parse_response(&body).unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error_auth() {
        let err = AnthropicProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "{}");
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }
}
