//! Fundamental types shared across the Regulant pipeline.
//!
//! Covers the LLM interaction types (messages, completion requests and
//! responses) and the pipeline data model (evidence chunks and draft
//! answers). Stage-specific result types live with their stage modules.

use serde::{Deserialize, Serialize};

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// A request to the LLM for completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub stop_sequences: Vec<String>,
    /// Per-request model override; falls back to the provider's configured model.
    pub model: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
            stop_sequences: Vec::new(),
            model: None,
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A completed LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Provenance class of a source document, inferred from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Fda,
    Who,
    Other,
}

impl DocumentType {
    /// Classify a source identifier by the agency name it carries.
    pub fn from_source(source: &str) -> Self {
        let lower = source.to_lowercase();
        if lower.contains("fda") {
            DocumentType::Fda
        } else if lower.contains("who") {
            DocumentType::Who
        } else {
            DocumentType::Other
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentType::Fda => write!(f, "fda"),
            DocumentType::Who => write!(f, "who"),
            DocumentType::Other => write!(f, "other"),
        }
    }
}

/// A retrieved passage of source text with provenance.
///
/// `rank` is 1-based and reflects the final ordering after any reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub rank: usize,
    pub content: String,
    pub source: String,
    /// Page number when the ingestor recorded one.
    pub page: Option<u32>,
    /// Relevance score, higher is better. Absent when the index did not
    /// report a score.
    pub relevance_score: Option<f32>,
    pub doc_type: DocumentType,
}

impl EvidenceChunk {
    /// Human-readable `source (Page: N)` reference, with "Unknown" for
    /// chunks whose page was not recorded.
    pub fn source_ref(&self) -> String {
        match self.page {
            Some(page) => format!("{} (Page: {})", self.source, page),
            None => format!("{} (Page: Unknown)", self.source),
        }
    }
}

/// An ordered evidence set, rank 1 first. Read-only once produced.
pub type EvidenceSet = Vec<EvidenceChunk>;

/// A synthesized, cited draft answer before verification and gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftAnswer {
    pub text: String,
    /// Model that produced the draft, for observability.
    pub model: String,
}
