//! Google Gemini API provider.
//!
//! Implements `LlmProvider` against the Gemini `generateContent` endpoint.

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::LlmProvider;
use crate::types::{CompletionRequest, CompletionResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl GeminiProvider {
    /// Create a new provider from configuration.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = super::resolve_api_key(config, "Gemini")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());

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

    /// Build the generateContent request body.
    ///
    /// Gemini separates the system instruction from the contents list and
    /// names the assistant role "model".
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(json!({ "text": msg.content })),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": msg.content }],
                })),
                Role::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": msg.content }],
                })),
            }
        }

        let mut generation_config = json!({
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        if !request.stop_sequences.is_empty() {
            generation_config["stopSequences"] = json!(request.stop_sequences);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }

        body
    }

    /// Parse a generateContent response body into a CompletionResponse.
    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let candidate = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No candidates in response".to_string(),
            })?;

        let text = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No content parts in candidate".to_string(),
            })?;

        let usage_obj = body.get("usageMetadata");
        let usage = TokenUsage {
            input_tokens: usage_obj
                .and_then(|u| u.get("promptTokenCount"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
            output_tokens: usage_obj
                .and_then(|u| u.get("candidatesTokenCount"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
        };

        let finish_reason = candidate
            .get("finishReason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        Ok(CompletionResponse {
            content: text,
            usage,
            model: model.to_string(),
            finish_reason,
        })
    }

    /// Map an HTTP error status to a structured LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            400 if body.contains("API_KEY_INVALID") => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 5,
            },
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
impl LlmProvider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = self.build_request_body(&request);

        debug!(model = %model, "Sending Gemini completion request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
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
                        message: format!("Request to Gemini API failed: {}", e),
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

        Self::parse_response(&response_json, model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
