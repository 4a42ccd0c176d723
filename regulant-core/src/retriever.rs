//! Evidence retrieval stage.
//!
//! Two-stage retrieve-then-rerank: the vector index supplies `top_k`
//! candidates by embedding similarity, and when reranking is enabled a
//! cross-encoder reorders them and keeps the best `rerank_top_k`.

use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::rerank::{self, CrossEncoder};
use crate::types::EvidenceSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Evidence retriever over a vector index, with optional reranking.
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    encoder: Option<Arc<dyn CrossEncoder>>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Self {
        Self {
            index,
            encoder: None,
            config,
        }
    }

    /// Attach a cross-encoder. Reranking still only runs when
    /// `config.enable_rerank` is set.
    pub fn with_cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Retrieve evidence for a query.
    ///
    /// Returns at most `top_k` chunks ordered best-first, ranks assigned
    /// 1-based on the final ordering. Fails rather than fabricating partial
    /// results when the index is unreachable.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<EvidenceSet, RetrievalError> {
        let mut chunks = self.index.query(query, top_k).await?;
        debug!(retrieved = chunks.len(), top_k = top_k, "Index query complete");

        if self.config.enable_rerank {
            if let Some(encoder) = &self.encoder {
                chunks =
                    rerank::rerank(encoder.as_ref(), query, chunks, self.config.rerank_top_k)
                        .await?;
                debug!(kept = chunks.len(), "Reranking complete");
            }
        }

        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.rank = i + 1;
        }

        info!(
            chunks = chunks.len(),
            reranked = self.config.enable_rerank && self.encoder.is_some(),
            "Evidence retrieved"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StaticIndex;
    use crate::rerank::StaticScorer;

    fn index_with_three() -> Arc<StaticIndex> {
        Arc::new(StaticIndex::new(vec![
            StaticIndex::chunk("design controls apply", "FDA_Guidance.pdf", 4, 0.9),
            StaticIndex::chunk("software validation plan", "FDA_Guidance.pdf", 9, 0.8),
            StaticIndex::chunk("quality management systems", "WHO_GMP.pdf", 2, 0.7),
        ]))
    }

    #[tokio::test]
    async fn test_retrieve_assigns_ranks() {
        let retriever = Retriever::new(index_with_three(), RetrievalConfig::default());
        let evidence = retriever.retrieve("design controls", 3).await.unwrap();
        assert_eq!(evidence.len(), 3);
        assert_eq!(evidence[0].rank, 1);
        assert_eq!(evidence[2].rank, 3);
    }

    #[tokio::test]
    async fn test_retrieve_respects_top_k() {
        let retriever = Retriever::new(index_with_three(), RetrievalConfig::default());
        let evidence = retriever.retrieve("design controls", 2).await.unwrap();
        assert_eq!(evidence.len(), 2);
    }

    #[tokio::test]
    async fn test_retrieve_propagates_unavailable_index() {
        let retriever = Retriever::new(
            Arc::new(StaticIndex::unavailable()),
            RetrievalConfig::default(),
        );
        let err = retriever.retrieve("q", 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_retrieve_reranks_when_enabled() {
        let config = RetrievalConfig {
            enable_rerank: true,
            rerank_top_k: 2,
            ..Default::default()
        };
        // Cross-encoder disagrees with the embedding order: last chunk wins.
        let scorer = Arc::new(StaticScorer {
            scores: vec![0.1, 0.2, 0.9],
        });
        let retriever = Retriever::new(index_with_three(), config).with_cross_encoder(scorer);

        let evidence = retriever.retrieve("quality systems", 3).await.unwrap();
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[0].content, "quality management systems");
        assert_eq!(evidence[0].rank, 1);
        assert_eq!(evidence[1].content, "software validation plan");
    }

    #[tokio::test]
    async fn test_retrieve_skips_rerank_without_encoder() {
        let config = RetrievalConfig {
            enable_rerank: true,
            rerank_top_k: 1,
            ..Default::default()
        };
        let retriever = Retriever::new(index_with_three(), config);
        // No encoder attached: the initial retrieval order passes through.
        let evidence = retriever.retrieve("q", 3).await.unwrap();
        assert_eq!(evidence.len(), 3);
        assert_eq!(evidence[0].content, "design controls apply");
    }
}
