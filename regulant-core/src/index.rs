//! Vector index client.
//!
//! The index is an external collaborator: a nearest-neighbor query service
//! populated offline by the ingestion tooling. This module defines the
//! `VectorIndex` trait the retriever depends on, an HTTP implementation
//! against the index's query endpoint, and a static in-memory index used by
//! tests.

use crate::error::RetrievalError;
use crate::types::{DocumentType, EvidenceChunk};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Trait for nearest-neighbor query services.
///
/// Implementations must be safe for concurrent use by multiple in-flight
/// queries (stateless or connection-pooled clients).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` chunks most relevant to `query`, best first.
    async fn query(&self, query: &str, k: usize) -> Result<Vec<EvidenceChunk>, RetrievalError>;
}

/// One hit in the index query response.
#[derive(Debug, Deserialize)]
struct IndexHit {
    content: String,
    source: String,
    #[serde(default)]
    page: Option<u32>,
    /// Embedding-space distance, lower is better.
    #[serde(default)]
    distance: Option<f32>,
    /// Pre-computed relevance score, higher is better. Wins over `distance`
    /// when both are present.
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct IndexQueryResponse {
    results: Vec<IndexHit>,
}

/// HTTP client for the vector index query service.
pub struct HttpVectorIndex {
    client: Client,
    base_url: String,
    collection: String,
    timeout_secs: u64,
}

impl HttpVectorIndex {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Unavailable {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            collection: collection.into(),
            timeout_secs,
        })
    }

    /// Normalize a hit to a relevance score where higher is better.
    ///
    /// The index reports embedding distances (lower = closer); the rest of
    /// the pipeline orders by descending relevance, so the sign convention is
    /// fixed once here and never revisited downstream.
    fn relevance_of(hit: &IndexHit) -> Option<f32> {
        hit.score.or_else(|| hit.distance.map(|d| 1.0 / (1.0 + d)))
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn query(&self, query: &str, k: usize) -> Result<Vec<EvidenceChunk>, RetrievalError> {
        let url = format!("{}/collections/{}/query", self.base_url, self.collection);
        let body = json!({
            "query": query,
            "top_k": k,
        });

        debug!(url = %url, top_k = k, "Querying vector index");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    RetrievalError::Unavailable {
                        message: format!("Index request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| RetrievalError::Unavailable {
                message: format!("Failed to read index response: {}", e),
            })?;

        if !status.is_success() {
            return Err(RetrievalError::Unavailable {
                message: format!("Index returned {}: {}", status, body_text),
            });
        }

        let parsed: IndexQueryResponse =
            serde_json::from_str(&body_text).map_err(|e| RetrievalError::InvalidResponse {
                message: format!("Invalid index response JSON: {}", e),
            })?;

        let chunks = parsed
            .results
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, hit)| {
                let relevance_score = Self::relevance_of(&hit);
                EvidenceChunk {
                    rank: i + 1,
                    doc_type: DocumentType::from_source(&hit.source),
                    content: hit.content,
                    source: hit.source,
                    page: hit.page,
                    relevance_score,
                }
            })
            .collect();

        Ok(chunks)
    }
}

/// A fixed in-memory index for tests: returns the first `k` of its chunks.
pub struct StaticIndex {
    chunks: Vec<EvidenceChunk>,
    available: bool,
}

impl StaticIndex {
    pub fn new(chunks: Vec<EvidenceChunk>) -> Self {
        Self {
            chunks,
            available: true,
        }
    }

    /// An index that fails every query, for testing unavailability paths.
    pub fn unavailable() -> Self {
        Self {
            chunks: Vec::new(),
            available: false,
        }
    }

    /// Build a chunk with sensible defaults for test fixtures.
    pub fn chunk(content: &str, source: &str, page: u32, score: f32) -> EvidenceChunk {
        EvidenceChunk {
            rank: 0,
            content: content.to_string(),
            source: source.to_string(),
            page: Some(page),
            relevance_score: Some(score),
            doc_type: DocumentType::from_source(source),
        }
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn query(&self, _query: &str, k: usize) -> Result<Vec<EvidenceChunk>, RetrievalError> {
        if !self.available {
            return Err(RetrievalError::Unavailable {
                message: "static index marked unavailable".to_string(),
            });
        }
        Ok(self.chunks.iter().take(k).cloned().collect())
    }
}
