//! Error types for the Regulant pipeline core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM, retrieval, guard, and configuration domains.

use std::path::PathBuf;

/// Top-level error type for the Regulant core library.
#[derive(Debug, thiserror::Error)]
pub enum RegulantError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Guard error: {0}")]
    Guard(#[from] GuardError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the evidence retrieval stage (vector index and reranker).
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Vector index unavailable: {message}")]
    Unavailable { message: String },

    #[error("Vector index query timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid response from vector index: {message}")]
    InvalidResponse { message: String },

    #[error("Cross-encoder reranking failed: {message}")]
    Rerank { message: String },
}

/// Errors from the safety guard.
///
/// Invalid classifier output is NOT an error: it is recovered locally with
/// fail-closed labels. Only a classifier that cannot be reached at all
/// surfaces here, and the orchestrator must treat that as a block.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Safety classifier unavailable: {message}")]
    ClassifierUnavailable { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `RegulantError`.
pub type Result<T> = std::result::Result<T, RegulantError>;
