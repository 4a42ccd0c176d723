//! Cross-encoder reranking.
//!
//! Second-stage precision pass over the retriever's candidates: every
//! (query, chunk) pair is scored by a pairwise relevance model, candidates
//! are stable-sorted by descending score, and the list is truncated. The
//! first stage buys recall cheaply with embedding similarity; this stage
//! spends the expensive pairwise model only on the small candidate set.

use crate::error::RetrievalError;
use crate::types::EvidenceChunk;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Trait for pairwise relevance scorers.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score each candidate's relevance to the query. Returns one score per
    /// candidate, in input order; higher is more relevant.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, RetrievalError>;
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// HTTP client for a cross-encoder scoring service.
pub struct HttpCrossEncoder {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpCrossEncoder {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Rerank {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, RetrievalError> {
        let url = format!("{}/rerank", self.base_url);
        let body = json!({
            "query": query,
            "texts": candidates,
        });

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
                    RetrievalError::Rerank {
                        message: format!("Scorer request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| RetrievalError::Rerank {
            message: format!("Failed to read scorer response: {}", e),
        })?;

        if !status.is_success() {
            return Err(RetrievalError::Rerank {
                message: format!("Scorer returned {}: {}", status, body_text),
            });
        }

        let parsed: RerankResponse =
            serde_json::from_str(&body_text).map_err(|e| RetrievalError::Rerank {
                message: format!("Invalid scorer response JSON: {}", e),
            })?;

        Ok(parsed.scores)
    }
}

/// Rerank `chunks` by cross-encoder relevance to `query` and keep the best
/// `top_k`.
///
/// The sort is stable: candidates with equal scores keep their original
/// retrieval order. The output is always a subset of the input.
pub async fn rerank(
    encoder: &dyn CrossEncoder,
    query: &str,
    chunks: Vec<EvidenceChunk>,
    top_k: usize,
) -> Result<Vec<EvidenceChunk>, RetrievalError> {
    if chunks.is_empty() {
        return Ok(chunks);
    }

    let candidates: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let scores = encoder.score(query, &candidates).await?;

    if scores.len() != chunks.len() {
        return Err(RetrievalError::Rerank {
            message: format!(
                "scorer returned {} scores for {} candidates",
                scores.len(),
                chunks.len()
            ),
        });
    }

    let mut scored: Vec<(usize, EvidenceChunk, f32)> = chunks
        .into_iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (chunk, score))| (i, chunk, score))
        .collect();
    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    for (new_idx, (old_idx, _, score)) in scored.iter().enumerate() {
        debug!(
            from = old_idx,
            to = new_idx,
            score = score,
            "Rerank order change"
        );
    }

    let mut reranked: Vec<EvidenceChunk> = scored
        .into_iter()
        .take(top_k)
        .map(|(_, mut chunk, score)| {
            chunk.relevance_score = Some(score);
            chunk
        })
        .collect();
    for (i, chunk) in reranked.iter_mut().enumerate() {
        chunk.rank = i + 1;
    }

    Ok(reranked)
}

/// A cross-encoder returning a fixed score vector, for tests.
pub struct StaticScorer {
    pub scores: Vec<f32>,
}

#[async_trait]
impl CrossEncoder for StaticScorer {
    async fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.scores.iter().take(candidates.len()).cloned().collect())
    }
}
