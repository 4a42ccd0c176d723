//! LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic text generation. The
//! pipeline stages (synthesizer, verifier assessment, safety guard) depend
//! only on this trait; concrete backends live in `providers/` and are
//! selected once at construction time via `providers::create_provider`.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, TokenUsage};
use async_trait::async_trait;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the configured model name.
    fn model_name(&self) -> &str;
}

/// A mock LLM provider for testing.
///
/// Returns queued responses in FIFO order and records every request it
/// receives, so tests can assert on the prompts the pipeline built.
pub struct MockLlmProvider {
    model: String,
    responses: std::sync::Mutex<Vec<CompletionResponse>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: std::sync::Mutex::new(Vec::new()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    ///
    /// Queues multiple copies of the response so it can handle multiple calls.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        for _ in 0..20 {
            provider.queue_response(Self::text_response(text));
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push(response);
    }

    /// Queue a plain text response.
    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// All requests received so far, in call order.
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(LlmError::ApiRequest {
                message: "MockLlmProvider has no queued responses".to_string(),
            })
        } else {
            Ok(responses.remove(0))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// A mock provider that always fails with a connection error, for testing
/// unavailability paths.
pub struct UnavailableLlmProvider;

#[async_trait]
impl LlmProvider for UnavailableLlmProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::Connection {
            message: "connection refused".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "unavailable-model"
    }
}
